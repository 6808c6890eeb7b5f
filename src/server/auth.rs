use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::Redirect,
};
use axum_extra::extract::SignedCookieJar;
use axum_extra::extract::cookie::Cookie;
use thiserror::Error;

use crate::auth::{
    OAUTH_STATE_COOKIE, OAuthError, RequireUser, SESSION_COOKIE, Session, find_or_create_user,
    oauth_state_cookie, random_token, session_cookie,
};
use crate::error::Error as StoreError;
use crate::server::AppState;
use crate::server::dto::OAuthCallbackParams;
use crate::types::User;

#[derive(Debug, Error)]
enum LoginError {
    #[error("provider returned error: {0}")]
    Provider(String),
    #[error("missing authorization code")]
    MissingCode,
    #[error("state parameter does not match")]
    StateMismatch,
    #[error(transparent)]
    OAuth(#[from] OAuthError),
    #[error("failed to persist user: {0}")]
    Store(#[from] StoreError),
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> (SignedCookieJar, Redirect) {
    let oauth_state = random_token();
    let authorize_url = state.identity.authorize_url(&oauth_state);

    let jar = SignedCookieJar::from_headers(&headers, state.cookie_key.clone())
        .add(oauth_state_cookie(oauth_state, state.secure_cookies));

    (jar, Redirect::to(&authorize_url))
}

pub async fn callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<OAuthCallbackParams>,
) -> (SignedCookieJar, Redirect) {
    let jar = SignedCookieJar::from_headers(&headers, state.cookie_key.clone());
    let expected_state = jar.get(OAUTH_STATE_COOKIE).map(|c| c.value().to_string());
    let jar = jar.remove(Cookie::build(OAUTH_STATE_COOKIE).path("/api/auth"));

    match complete_login(&state, &params, expected_state.as_deref()).await {
        Ok(session) => {
            tracing::info!("User {} signed in", session.user_id);
            let jar = jar.add(session_cookie(session.id, state.secure_cookies));
            (jar, Redirect::to("/"))
        }
        Err(e) => {
            tracing::warn!("GitHub login failed: {e}");
            (jar, Redirect::to("/login"))
        }
    }
}

async fn complete_login(
    state: &AppState,
    params: &OAuthCallbackParams,
    expected_state: Option<&str>,
) -> Result<Session, LoginError> {
    if let Some(error) = &params.error {
        return Err(LoginError::Provider(error.clone()));
    }

    match (expected_state, params.state.as_deref()) {
        (Some(expected), Some(actual)) if expected == actual => {}
        _ => return Err(LoginError::StateMismatch),
    }

    let code = params
        .code
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or(LoginError::MissingCode)?;

    let profile = state.identity.fetch_profile(code).await?;
    let user = find_or_create_user(state.store.as_ref(), &profile)?;

    Ok(state.sessions.create(user.id))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> (SignedCookieJar, StatusCode) {
    let jar = SignedCookieJar::from_headers(&headers, state.cookie_key.clone());
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        state.sessions.remove(cookie.value());
    }

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, StatusCode::NO_CONTENT)
}

pub async fn me(auth: RequireUser) -> Json<User> {
    Json(auth.user)
}
