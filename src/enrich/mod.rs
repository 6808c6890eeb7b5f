//! AI enrichment of repositories.
//!
//! [`Enricher::analyze`] never fails: transport errors, rate limits and
//! unusable model output all degrade to a deterministic analysis derived from
//! the repository name.

mod openai;

pub use openai::OpenAiBackend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

use crate::retry::{RetryDecision, RetryPolicy, retry};
use crate::types::{AiAnalysis, DomainCategory, Insights, MAX_SUGGESTION_CHARS, SUGGESTION_COUNT};

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);
const DEFAULT_SCORE: u8 = 50;
const MAX_KEYWORDS: usize = 5;
const DEFAULT_KEYWORDS: [&str; 3] = ["github", "learning", "programming"];

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion API rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },
    #[error("completion API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("completion API returned no content")]
    Empty,
}

/// A hosted chat-completion endpoint that answers with a JSON object.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Sends `prompt` and returns the raw message content.
    async fn complete_json(&self, prompt: &str) -> Result<String, CompletionError>;
}

fn classify(err: &CompletionError) -> RetryDecision {
    match err {
        CompletionError::RateLimited { retry_after } => {
            RetryDecision::After(retry_after.unwrap_or(DEFAULT_RETRY_AFTER))
        }
        CompletionError::Status { status, .. } if *status >= 500 => RetryDecision::Backoff,
        CompletionError::Transport(_) => RetryDecision::Backoff,
        CompletionError::Status { .. } | CompletionError::Empty => RetryDecision::Stop,
    }
}

#[derive(Debug, Error)]
enum ParseError {
    #[error("response is not a JSON object")]
    NotAnObject,
    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response has no suggestions list")]
    MissingSuggestions,
}

pub struct Enricher {
    backend: Arc<dyn CompletionBackend>,
    retry: RetryPolicy,
}

impl Enricher {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn analyze(&self, name: &str, description: Option<&str>) -> AiAnalysis {
        let prompt = build_prompt(name, description);

        let result = retry(&self.retry, classify, |_| self.backend.complete_json(&prompt)).await;
        let content = match result {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Enrichment of {name} failed, using defaults: {e}");
                return fallback_analysis(name);
            }
        };

        match parse_analysis(name, &content) {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::warn!("Unusable enrichment for {name}, using defaults: {e}");
                fallback_analysis(name)
            }
        }
    }
}

fn build_prompt(name: &str, description: Option<&str>) -> String {
    let description = description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or("No description");
    let categories = DomainCategory::ALL
        .iter()
        .map(|c| format!("\"{}\"", c.label()))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are an AI assistant analyzing source code repositories. Given the repository "{name}" with description "{description}", analyze its impact and provide insights.

1. Provide 3 practical learning suggestions, each under 100 characters.
2. List up to 5 keywords that describe the repository.
3. Pick the single best domain category from: {categories}.
4. Rate how strongly it is trending with an integer from 0 to 100.
5. Explain why it is trending, its impact on the developer ecosystem and its likely future.

Respond with a JSON object in exactly this format:
{{
  "suggestions": ["suggestion1", "suggestion2", "suggestion3"],
  "topKeywords": ["keyword1", "keyword2"],
  "domainCategory": "Web Development",
  "trendingScore": 75,
  "insights": {{
    "trendReason": "Why this repository is trending",
    "ecosystemImpact": "How it affects the developer ecosystem",
    "futureOutlook": "Predicted future trajectory and relevance"
  }}
}}"#
    )
}

fn parse_analysis(name: &str, content: &str) -> Result<AiAnalysis, ParseError> {
    let value: Value = serde_json::from_str(content)?;
    let object = value.as_object().ok_or(ParseError::NotAnObject)?;

    let raw_suggestions = object
        .get("suggestions")
        .and_then(Value::as_array)
        .ok_or(ParseError::MissingSuggestions)?;

    let mut suggestions: Vec<String> = raw_suggestions
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| truncate_chars(s, MAX_SUGGESTION_CHARS))
        .take(SUGGESTION_COUNT)
        .collect();
    while suggestions.len() < SUGGESTION_COUNT {
        suggestions.push(default_suggestion(name, suggestions.len()));
    }

    let top_keywords = object
        .get("topKeywords")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .take(MAX_KEYWORDS)
                .collect::<Vec<_>>()
        })
        .filter(|k| !k.is_empty())
        .unwrap_or_else(|| name_keywords(name));

    let domain_category = object
        .get("domainCategory")
        .and_then(Value::as_str)
        .and_then(DomainCategory::from_label)
        .unwrap_or(DomainCategory::Educational);

    let trending_score = object
        .get("trendingScore")
        .and_then(Value::as_f64)
        .filter(|s| s.is_finite())
        .map(|s| s.round().clamp(0.0, 100.0) as u8)
        .unwrap_or(DEFAULT_SCORE);

    let insights = object.get("insights");
    let insight = |key: &str| {
        insights
            .and_then(|i| i.get(key))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let insights = Insights {
        trend_reason: insight("trendReason")
            .unwrap_or_else(|| format!("{name} is gaining traction in the developer community")),
        ecosystem_impact: insight("ecosystemImpact")
            .unwrap_or_else(|| "Contributing to developer productivity".to_string()),
        future_outlook: insight("futureOutlook")
            .unwrap_or_else(|| "Expected to maintain steady growth and adoption".to_string()),
    };

    Ok(AiAnalysis {
        suggestions,
        analyzed_at: Utc::now(),
        top_keywords: Some(top_keywords),
        domain_category: Some(domain_category),
        trending_score: Some(trending_score),
        insights: Some(insights),
    })
}

/// The analysis served when the completion backend gives nothing usable.
pub fn fallback_analysis(name: &str) -> AiAnalysis {
    AiAnalysis {
        suggestions: (0..SUGGESTION_COUNT)
            .map(|i| default_suggestion(name, i))
            .collect(),
        analyzed_at: Utc::now(),
        top_keywords: Some(name_keywords(name)),
        domain_category: Some(DomainCategory::Educational),
        trending_score: Some(DEFAULT_SCORE),
        insights: Some(Insights {
            trend_reason: format!("{name} shows potential for growth"),
            ecosystem_impact: "Contributing to developer productivity".to_string(),
            future_outlook: "Monitoring community adoption and development".to_string(),
        }),
    }
}

fn default_suggestion(name: &str, index: usize) -> String {
    let suggestion = match index {
        0 => format!("Study the codebase of {name} to understand its architecture"),
        1 => format!("Implement a small feature in {name} to practice contributing"),
        _ => format!("Write tests for {name} to learn testing practices"),
    };
    truncate_chars(&suggestion, MAX_SUGGESTION_CHARS)
}

/// Keywords taken from the tokens of a repository name such as `owner/repo-name`.
fn name_keywords(name: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for token in name
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(str::to_lowercase)
    {
        if !keywords.contains(&token) {
            keywords.push(token);
        }
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
    }

    if keywords.is_empty() {
        DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect()
    } else {
        keywords
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect::<String>().trim_end().to_string()
}
