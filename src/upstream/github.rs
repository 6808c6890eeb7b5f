use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;

use super::{PAGE_SIZE, SourceError, TrendingQuery, TrendingSource, UpstreamRepo, fetch_body};
use crate::types::{Platform, PlatformData};

const DEFAULT_API_URL: &str = "https://api.github.com";

/// Trending repositories from the GitHub search API.
pub struct GithubSource {
    client: Client,
    api_url: String,
    token: Option<String>,
}

impl GithubSource {
    pub fn new(client: Client, token: Option<String>) -> Self {
        Self {
            client,
            api_url: DEFAULT_API_URL.to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }

    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// Builds the `q` parameter of a repository search.
fn search_query(query: &TrendingQuery) -> String {
    let mut q = format!("stars:>={}", query.min_stars);
    if let Some(language) = &query.language {
        if language.contains(' ') {
            q.push_str(&format!(" language:\"{language}\""));
        } else {
            q.push_str(&format!(" language:{language}"));
        }
    }
    q
}

fn search_params(query: &TrendingQuery) -> [(&'static str, String); 4] {
    [
        ("q", search_query(query)),
        ("sort", query.sort.as_str().to_string()),
        ("order", "desc".to_string()),
        ("per_page", PAGE_SIZE.to_string()),
    ]
}

#[derive(Deserialize)]
struct SearchResponse {
    items: Vec<GithubRepo>,
}

#[derive(Deserialize)]
struct GithubRepo {
    id: u64,
    full_name: String,
    html_url: String,
    stargazers_count: u64,
    forks_count: u64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    license: Option<GithubLicense>,
}

#[derive(Deserialize)]
struct GithubLicense {
    #[serde(default)]
    spdx_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl From<GithubRepo> for UpstreamRepo {
    fn from(repo: GithubRepo) -> Self {
        let (owner, name) = repo
            .full_name
            .split_once('/')
            .map(|(o, n)| (o.to_string(), n.to_string()))
            .unwrap_or_else(|| (String::new(), repo.full_name.clone()));
        let license = repo
            .license
            .and_then(|l| l.spdx_id.filter(|id| id != "NOASSERTION").or(l.name));

        UpstreamRepo {
            platform: Platform::Github,
            platform_id: repo.id.to_string(),
            name: repo.full_name,
            description: repo.description,
            language: repo.language,
            stars: repo.stargazers_count,
            forks: repo.forks_count,
            url: repo.html_url,
            platform_data: PlatformData::Github {
                owner,
                repo: name,
                topics: repo.topics,
                license,
            },
        }
    }
}

fn decode_search(body: &str) -> Result<Vec<UpstreamRepo>, SourceError> {
    let response: SearchResponse =
        serde_json::from_str(body).map_err(|e| SourceError::MalformedPayload {
            platform: Platform::Github,
            reason: e.to_string(),
        })?;

    Ok(response.items.into_iter().map(UpstreamRepo::from).collect())
}

#[async_trait]
impl TrendingSource for GithubSource {
    fn platform(&self) -> Platform {
        Platform::Github
    }

    fn has_credentials(&self) -> bool {
        self.token.is_some()
    }

    async fn fetch_trending(
        &self,
        query: &TrendingQuery,
    ) -> Result<Vec<UpstreamRepo>, SourceError> {
        let mut request = self
            .client
            .get(format!("{}/search/repositories", self.api_url))
            .query(&search_params(query))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, super::USER_AGENT);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(q = %search_query(query), sort = %query.sort, "Searching GitHub");
        let body = fetch_body(Platform::Github, request).await?;
        decode_search(&body)
    }
}
