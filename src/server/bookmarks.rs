use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};

use crate::auth::RequireSession;
use crate::error::Error;
use crate::server::AppState;
use crate::server::dto::CreateBookmarkRequest;
use crate::server::response::{ApiError, StoreOptionExt, StoreResultExt};
use crate::server::validation::validate_repo_id;
use crate::types::{Bookmark, RepositoryView};

pub async fn list_bookmarks(
    RequireSession(session): RequireSession,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RepositoryView>>, ApiError> {
    let repos = state
        .store
        .list_bookmarked_repositories(session.user_id)
        .api_err("Failed to fetch bookmarks")?;

    Ok(Json(repos.into_iter().map(RepositoryView::from).collect()))
}

pub async fn create_bookmark(
    RequireSession(session): RequireSession,
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateBookmarkRequest>, JsonRejection>,
) -> Result<Json<Bookmark>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let repo_id = validate_repo_id(req.repo_id.as_ref())?;
    let store = state.store.as_ref();

    store
        .get_repository(repo_id)
        .api_err("Failed to look up repository")?
        .or_not_found("Repository not found")?;

    if store
        .get_bookmark(session.user_id, repo_id)
        .api_err("Failed to check bookmark")?
        .is_some()
    {
        return Err(ApiError::conflict("Repository already bookmarked"));
    }

    match store.create_bookmark(session.user_id, repo_id) {
        Ok(bookmark) => Ok(Json(bookmark)),
        Err(Error::AlreadyExists) => Err(ApiError::conflict("Repository already bookmarked")),
        Err(Error::NotFound) => Err(ApiError::not_found("Repository not found")),
        Err(e) => Err(e).api_err("Failed to create bookmark"),
    }
}
