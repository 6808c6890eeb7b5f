use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::USER_AGENT;
use serde::Deserialize;

use super::{
    PAGE_SIZE, SortKey, SourceError, TrendingQuery, TrendingSource, UpstreamRepo, fetch_body,
};
use crate::types::{Platform, PlatformData};

const DEFAULT_BASE_URL: &str = "https://gitlab.com";

/// Trending projects from the GitLab projects API. Works anonymously; a
/// token only raises rate limits.
pub struct GitlabSource {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl GitlabSource {
    pub fn new(client: Client, base_url: Option<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }
}

fn order_by(sort: SortKey) -> &'static str {
    match sort {
        // No fork ordering upstream; fetch the most starred and sort locally.
        SortKey::Stars | SortKey::Forks => "star_count",
        SortKey::Updated => "last_activity_at",
    }
}

fn project_params(query: &TrendingQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("order_by", order_by(query.sort).to_string()),
        ("sort", "desc".to_string()),
        ("per_page", PAGE_SIZE.to_string()),
        ("visibility", "public".to_string()),
    ];
    if let Some(language) = &query.language {
        params.push(("with_programming_language", language.clone()));
    }
    params
}

#[derive(Deserialize)]
struct GitlabProject {
    id: u64,
    path_with_namespace: String,
    web_url: String,
    star_count: u64,
    forks_count: u64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    visibility: Option<String>,
    namespace: GitlabNamespace,
}

#[derive(Deserialize)]
struct GitlabNamespace {
    full_path: String,
}

fn decode_projects(body: &str, query: &TrendingQuery) -> Result<Vec<UpstreamRepo>, SourceError> {
    let projects: Vec<GitlabProject> =
        serde_json::from_str(body).map_err(|e| SourceError::MalformedPayload {
            platform: Platform::Gitlab,
            reason: e.to_string(),
        })?;

    let mut repos: Vec<UpstreamRepo> = projects
        .into_iter()
        .filter(|p| p.star_count >= u64::from(query.min_stars))
        .map(|p| UpstreamRepo {
            platform: Platform::Gitlab,
            platform_id: p.id.to_string(),
            name: p.path_with_namespace,
            description: p.description.filter(|d| !d.trim().is_empty()),
            // The listing does not report languages; echo the filter.
            language: query.language.clone(),
            stars: p.star_count,
            forks: p.forks_count,
            url: p.web_url,
            platform_data: PlatformData::Gitlab {
                namespace: p.namespace.full_path,
                project_id: p.id,
                visibility: p.visibility,
            },
        })
        .collect();

    if query.sort == SortKey::Forks {
        // Stable, so equal fork counts keep the star ordering.
        repos.sort_by(|a, b| b.forks.cmp(&a.forks));
    }

    Ok(repos)
}

#[async_trait]
impl TrendingSource for GitlabSource {
    fn platform(&self) -> Platform {
        Platform::Gitlab
    }

    fn has_credentials(&self) -> bool {
        true
    }

    async fn fetch_trending(
        &self,
        query: &TrendingQuery,
    ) -> Result<Vec<UpstreamRepo>, SourceError> {
        let mut request = self
            .client
            .get(format!("{}/api/v4/projects", self.base_url))
            .query(&project_params(query))
            .header(USER_AGENT, super::USER_AGENT);
        if let Some(token) = &self.token {
            request = request.header("PRIVATE-TOKEN", token);
        }

        tracing::debug!(sort = %query.sort, language = ?query.language, "Listing GitLab projects");
        let body = fetch_body(Platform::Gitlab, request).await?;
        decode_projects(&body, query)
    }
}
