use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AiAnalysis;

/// Code hosting platform a repository was discovered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Github,
    Gitlab,
    Bitbucket,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Github, Platform::Gitlab, Platform::Bitbucket];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Github => "github",
            Platform::Gitlab => "gitlab",
            Platform::Bitbucket => "bitbucket",
        }
    }

    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Platform::Github => "GitHub",
            Platform::Gitlab => "GitLab",
            Platform::Bitbucket => "Bitbucket",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown platform: {s}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub external_id: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Profile fields needed to create a user on first login.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub external_id: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
}

/// Platform-specific metadata, keyed by platform on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformData {
    Github {
        owner: String,
        repo: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        topics: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        license: Option<String>,
    },
    Gitlab {
        namespace: String,
        #[serde(rename = "projectId")]
        project_id: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        visibility: Option<String>,
    },
}

/// A cached snapshot of an upstream repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: i64,
    pub platform: Platform,
    pub platform_id: String,
    pub name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub stars: i64,
    pub forks: i64,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_data: Option<PlatformData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<AiAnalysis>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRepository {
    pub platform: Platform,
    pub platform_id: String,
    pub name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub stars: i64,
    pub forks: i64,
    pub url: String,
    pub platform_data: Option<PlatformData>,
    pub ai_analysis: Option<AiAnalysis>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bookmark {
    pub id: i64,
    pub user_id: i64,
    pub repository_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Client-facing projection of a repository.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryView {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub stars: i64,
    pub forks: i64,
    pub url: String,
    pub ai_analysis: Option<AiAnalysis>,
}

impl From<Repository> for RepositoryView {
    fn from(repo: Repository) -> Self {
        Self {
            id: repo.id,
            name: repo.name,
            description: repo.description,
            language: repo.language,
            stars: repo.stars,
            forks: repo.forks,
            url: repo.url,
            ai_analysis: repo.ai_analysis,
        }
    }
}
