use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};

use crate::ingest::IngestError;
use crate::server::AppState;
use crate::server::dto::TrendingParams;
use crate::server::response::ApiError;
use crate::server::validation::trending_query;
use crate::types::RepositoryView;
use crate::upstream::SourceError;

pub async fn get_trending(
    State(state): State<Arc<AppState>>,
    params: Result<Query<TrendingParams>, QueryRejection>,
) -> Result<Json<Vec<RepositoryView>>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let query = trending_query(&params)?;

    let repos = state.trending.trending(&query).await.map_err(ingest_error)?;

    Ok(Json(repos))
}

fn ingest_error(err: IngestError) -> ApiError {
    match err {
        IngestError::UnsupportedPlatform(_) => ApiError::bad_request(err.to_string()),
        IngestError::MissingCredentials(_) => ApiError::service_unavailable(err.to_string()),
        IngestError::Source(SourceError::RateLimited { platform }) => ApiError::internal(format!(
            "{} API rate limit exceeded. Please try again later.",
            platform.display_name()
        )),
        IngestError::Source(SourceError::Unauthorized { platform }) => ApiError::internal(format!(
            "{} API authentication failed. Please check the configured token.",
            platform.display_name()
        )),
        IngestError::Source(e) => {
            ApiError::internal("Failed to fetch trending repositories").with_detail(e)
        }
        IngestError::Store(e) => {
            tracing::error!("Failed to cache trending repositories: {e}");
            ApiError::internal("Failed to fetch trending repositories").with_detail(e)
        }
    }
}
