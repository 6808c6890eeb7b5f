use std::sync::Arc;

use axum::{
    Json,
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use axum_extra::extract::SignedCookieJar;
use serde_json::json;

use super::session::{SESSION_COOKIE, Session};
use crate::server::AppState;
use crate::types::User;

/// Extractor that requires a live session. Does not touch the store.
pub struct RequireSession(pub Session);

/// Extractor that requires a live session whose user still exists.
pub struct RequireUser {
    pub session: Session,
    pub user: User,
}

#[derive(Debug)]
pub enum AuthError {
    MissingSession,
    InvalidSession,
    UserNotFound,
    InternalError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingSession | AuthError::InvalidSession | AuthError::UserNotFound => {
                (StatusCode::UNAUTHORIZED, "Not authenticated")
            }
            AuthError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}

impl FromRequestParts<Arc<AppState>> for RequireSession {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session = extract_session(parts, state)?;
        Ok(RequireSession(session))
    }
}

impl FromRequestParts<Arc<AppState>> for RequireUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let session = extract_session(parts, state)?;

        let user = state
            .store
            .get_user(session.user_id)
            .map_err(|e| {
                tracing::error!("Failed to load session user {}: {e}", session.user_id);
                AuthError::InternalError
            })?
            .ok_or(AuthError::UserNotFound)?;

        Ok(RequireUser { session, user })
    }
}

/// Reads the signed session cookie and resolves it against the session store.
fn session_id(parts: &Parts, state: &AppState) -> Option<String> {
    let jar = SignedCookieJar::from_headers(&parts.headers, state.cookie_key.clone());
    jar.get(SESSION_COOKIE).map(|c| c.value().to_string())
}

fn extract_session(parts: &Parts, state: &AppState) -> Result<Session, AuthError> {
    let id = session_id(parts, state).ok_or(AuthError::MissingSession)?;
    state.sessions.get(&id).ok_or(AuthError::InvalidSession)
}
