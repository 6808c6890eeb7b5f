use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of learning suggestions attached to every analysis.
pub const SUGGESTION_COUNT: usize = 3;
/// Maximum length of a single suggestion, in characters.
pub const MAX_SUGGESTION_CHARS: usize = 100;

/// Closed set of domains a repository can be filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DomainCategory {
    #[serde(rename = "Web Development")]
    WebDevelopment,
    #[serde(rename = "Data Science & ML")]
    DataScience,
    #[serde(rename = "DevOps & Infrastructure")]
    DevOps,
    #[serde(rename = "Mobile Development")]
    Mobile,
    #[serde(rename = "Security & Privacy")]
    Security,
    #[serde(rename = "UI/UX & Design")]
    Design,
    #[serde(rename = "Enterprise Solutions")]
    Enterprise,
    #[serde(rename = "Educational Resources")]
    Educational,
}

impl DomainCategory {
    pub const ALL: [DomainCategory; 8] = [
        DomainCategory::WebDevelopment,
        DomainCategory::DataScience,
        DomainCategory::DevOps,
        DomainCategory::Mobile,
        DomainCategory::Security,
        DomainCategory::Design,
        DomainCategory::Enterprise,
        DomainCategory::Educational,
    ];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            DomainCategory::WebDevelopment => "Web Development",
            DomainCategory::DataScience => "Data Science & ML",
            DomainCategory::DevOps => "DevOps & Infrastructure",
            DomainCategory::Mobile => "Mobile Development",
            DomainCategory::Security => "Security & Privacy",
            DomainCategory::Design => "UI/UX & Design",
            DomainCategory::Enterprise => "Enterprise Solutions",
            DomainCategory::Educational => "Educational Resources",
        }
    }

    /// Matches a free-form label against the closed set, ignoring case and
    /// surrounding whitespace.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for DomainCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insights {
    pub trend_reason: String,
    pub ecosystem_impact: String,
    pub future_outlook: String,
}

/// AI-generated analysis of a repository, in its current shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAnalysis {
    pub suggestions: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_keywords: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_category: Option<DomainCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trending_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insights: Option<Insights>,
}

/// Versioned on-disk representation.
#[derive(Serialize, Deserialize)]
#[serde(tag = "version")]
enum VersionedAnalysis {
    #[serde(rename = "2")]
    V2(AiAnalysis),
}

/// Rows written before analyses carried a version tag. The earliest rows hold
/// only suggestions and a timestamp; later ones add the optional fields.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct UnversionedAnalysis {
    suggestions: Vec<String>,
    analyzed_at: DateTime<Utc>,
    #[serde(default)]
    top_keywords: Option<Vec<String>>,
    #[serde(default)]
    domain_category: Option<String>,
    #[serde(default)]
    trending_score: Option<f64>,
    #[serde(default)]
    insights: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredAnalysis {
    Versioned(VersionedAnalysis),
    Unversioned(UnversionedAnalysis),
}

impl From<UnversionedAnalysis> for AiAnalysis {
    fn from(old: UnversionedAnalysis) -> Self {
        let insights = old
            .insights
            .and_then(|v| serde_json::from_value::<Insights>(v).ok());

        Self {
            suggestions: old.suggestions,
            analyzed_at: old.analyzed_at,
            top_keywords: old.top_keywords,
            domain_category: old
                .domain_category
                .as_deref()
                .and_then(DomainCategory::from_label),
            trending_score: old
                .trending_score
                .filter(|s| s.is_finite())
                .map(|s| s.round().clamp(0.0, 100.0) as u8),
            insights,
        }
    }
}

impl AiAnalysis {
    /// Serializes into the current versioned storage format.
    pub fn to_stored(&self) -> Result<String> {
        Ok(serde_json::to_string(&VersionedAnalysis::V2(self.clone()))?)
    }

    /// Decodes a stored analysis, migrating legacy rows to the current shape.
    pub fn from_stored(raw: &str) -> Result<Self> {
        let stored: StoredAnalysis = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidData(format!("unrecognized analysis payload: {e}")))?;

        Ok(match stored {
            StoredAnalysis::Versioned(VersionedAnalysis::V2(analysis)) => analysis,
            StoredAnalysis::Unversioned(old) => old.into(),
        })
    }
}
