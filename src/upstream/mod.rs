//! Trending data sources.
//!
//! Each platform implements [`TrendingSource`]. Upstream payloads are decoded
//! into strict types; anything that does not fit becomes
//! [`SourceError::MalformedPayload`].

mod github;
mod gitlab;

pub use github::GithubSource;
pub use gitlab::GitlabSource;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::types::{AiAnalysis, NewRepository, Platform, PlatformData};

/// Number of repositories requested from upstream per query.
pub const PAGE_SIZE: u32 = 30;
pub const DEFAULT_MIN_STARS: u32 = 100;
const MAX_LANGUAGE_LEN: usize = 40;

pub(crate) const USER_AGENT: &str = concat!("trendscope/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Stars,
    Forks,
    Updated,
}

impl SortKey {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::Stars => "stars",
            SortKey::Forks => "forks",
            SortKey::Updated => "updated",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stars" => Ok(SortKey::Stars),
            "forks" => Ok(SortKey::Forks),
            "updated" => Ok(SortKey::Updated),
            _ => Err(format!("unknown sort key: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendingQuery {
    pub platform: Platform,
    /// `None` means every language.
    pub language: Option<String>,
    pub sort: SortKey,
    pub min_stars: u32,
}

impl Default for TrendingQuery {
    fn default() -> Self {
        Self {
            platform: Platform::Github,
            language: None,
            sort: SortKey::Stars,
            min_stars: DEFAULT_MIN_STARS,
        }
    }
}

/// Normalizes a language filter. Empty and `All` mean no filter; anything
/// that could inject search qualifiers is rejected.
pub fn parse_language(raw: &str) -> Result<Option<String>, String> {
    let language = raw.trim();
    if language.is_empty() || language.eq_ignore_ascii_case("all") {
        return Ok(None);
    }

    if language.chars().count() > MAX_LANGUAGE_LEN {
        return Err(format!(
            "language must be at most {MAX_LANGUAGE_LEN} characters"
        ));
    }

    let valid = language
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '#' | '.' | ' ' | '_' | '-'));
    if !valid {
        return Err(format!("invalid language: {language}"));
    }

    Ok(Some(language.to_string()))
}

/// One repository as reported by an upstream platform.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRepo {
    pub platform: Platform,
    pub platform_id: String,
    pub name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub stars: u64,
    pub forks: u64,
    pub url: String,
    pub platform_data: PlatformData,
}

impl UpstreamRepo {
    #[must_use]
    pub fn into_new_repository(self, analysis: AiAnalysis) -> NewRepository {
        NewRepository {
            platform: self.platform,
            platform_id: self.platform_id,
            name: self.name,
            description: self.description,
            language: self.language,
            stars: i64::try_from(self.stars).unwrap_or(i64::MAX),
            forks: i64::try_from(self.forks).unwrap_or(i64::MAX),
            url: self.url,
            platform_data: Some(self.platform_data),
            ai_analysis: Some(analysis),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{} API rate limit exceeded", .platform.display_name())]
    RateLimited { platform: Platform },
    #[error("{} API rejected the configured credentials", .platform.display_name())]
    Unauthorized { platform: Platform },
    #[error("{} API returned {status}", .platform.display_name())]
    Status { platform: Platform, status: u16 },
    #[error("{} request failed: {source}", .platform.display_name())]
    Http {
        platform: Platform,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected {} payload: {reason}", .platform.display_name())]
    MalformedPayload { platform: Platform, reason: String },
}

/// A platform that can list its currently trending repositories.
#[async_trait]
pub trait TrendingSource: Send + Sync {
    fn platform(&self) -> Platform;

    /// Whether the source has what it needs to call upstream.
    fn has_credentials(&self) -> bool;

    /// Fetches one page of repositories, ordered descending by `query.sort`.
    async fn fetch_trending(&self, query: &TrendingQuery) -> Result<Vec<UpstreamRepo>, SourceError>;
}

pub(crate) fn check_status(platform: Platform, status: StatusCode) -> Result<(), SourceError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED => Err(SourceError::Unauthorized { platform }),
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            Err(SourceError::RateLimited { platform })
        }
        s => Err(SourceError::Status {
            platform,
            status: s.as_u16(),
        }),
    }
}

/// Sends a prepared request and returns the body of a successful response.
pub(crate) async fn fetch_body(
    platform: Platform,
    request: reqwest::RequestBuilder,
) -> Result<String, SourceError> {
    let http = |source| SourceError::Http { platform, source };

    let resp = request.send().await.map_err(http)?;
    check_status(platform, resp.status())?;
    resp.text().await.map_err(http)
}
