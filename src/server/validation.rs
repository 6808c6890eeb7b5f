use serde_json::Value;

use crate::server::dto::TrendingParams;
use crate::server::response::ApiError;
use crate::types::Platform;
use crate::upstream::{DEFAULT_MIN_STARS, SortKey, TrendingQuery, parse_language};

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub fn trending_query(params: &TrendingParams) -> Result<TrendingQuery, ApiError> {
    let platform = match non_blank(params.platform.as_deref()) {
        Some(raw) => raw.parse::<Platform>().map_err(ApiError::bad_request)?,
        None => Platform::Github,
    };

    let language = match params.language.as_deref() {
        Some(raw) => parse_language(raw).map_err(ApiError::bad_request)?,
        None => None,
    };

    let sort = match non_blank(params.sort.as_deref()) {
        Some(raw) => raw.parse::<SortKey>().map_err(ApiError::bad_request)?,
        None => SortKey::default(),
    };

    let min_stars = match non_blank(params.min_stars.as_deref()) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| ApiError::bad_request("minStars must be a non-negative integer"))?,
        None => DEFAULT_MIN_STARS,
    };

    Ok(TrendingQuery {
        platform,
        language,
        sort,
        min_stars,
    })
}

/// Accepts only positive JSON integers.
pub fn validate_repo_id(value: Option<&Value>) -> Result<i64, ApiError> {
    value
        .and_then(Value::as_i64)
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::bad_request("repoId must be a positive integer"))
}
