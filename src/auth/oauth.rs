use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{NewUser, User};

const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_API_URL: &str = "https://api.github.com";
const GITHUB_SCOPE: &str = "user:email";

/// Profile fields returned by an identity provider after login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProfile {
    pub external_id: String,
    pub username: String,
    pub avatar: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("profile request returned {0}")]
    Profile(u16),
    #[error("OAuth request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL the browser is sent to in order to start the login.
    fn authorize_url(&self, state: &str) -> String;

    /// Exchanges an authorization code for the user's profile.
    async fn fetch_profile(&self, code: &str) -> std::result::Result<OAuthProfile, OAuthError>;
}

pub struct GithubIdentityProvider {
    client: Client,
    client_id: String,
    client_secret: String,
    callback_url: String,
    authorize_url: String,
    token_url: String,
    api_url: String,
}

impl GithubIdentityProvider {
    pub fn new(
        client: Client,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            callback_url: callback_url.into(),
            authorize_url: GITHUB_AUTHORIZE_URL.to_string(),
            token_url: GITHUB_TOKEN_URL.to_string(),
            api_url: GITHUB_API_URL.to_string(),
        }
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct GithubUser {
    id: u64,
    login: String,
    #[serde(default)]
    avatar_url: Option<String>,
    #[serde(default)]
    bio: Option<String>,
}

impl From<GithubUser> for OAuthProfile {
    fn from(user: GithubUser) -> Self {
        Self {
            external_id: user.id.to_string(),
            username: user.login,
            avatar: user.avatar_url,
            bio: user.bio,
        }
    }
}

#[async_trait]
impl IdentityProvider for GithubIdentityProvider {
    fn authorize_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&scope={}&state={}",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.callback_url),
            urlencoding::encode(GITHUB_SCOPE),
            urlencoding::encode(state)
        )
    }

    async fn fetch_profile(&self, code: &str) -> std::result::Result<OAuthProfile, OAuthError> {
        let token: TokenResponse = self
            .client
            .post(&self.token_url)
            .header(ACCEPT, "application/json")
            .json(&TokenRequest {
                client_id: &self.client_id,
                client_secret: &self.client_secret,
                code,
                redirect_uri: &self.callback_url,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let access_token = match token {
            TokenResponse {
                access_token: Some(t),
                ..
            } => t,
            TokenResponse {
                error,
                error_description,
                ..
            } => {
                return Err(OAuthError::TokenExchange(
                    error_description
                        .or(error)
                        .unwrap_or_else(|| "no access token in response".to_string()),
                ));
            }
        };

        let resp = self
            .client
            .get(format!("{}/user", self.api_url))
            .bearer_auth(access_token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, crate::upstream::USER_AGENT)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(OAuthError::Profile(resp.status().as_u16()));
        }

        let user: GithubUser = resp.json().await?;
        Ok(user.into())
    }
}

/// Returns the user for `profile`, creating it on first login.
///
/// A concurrent login for the same account is resolved by reselecting. If the
/// username is held by a different account, the external id is appended.
pub fn find_or_create_user(store: &dyn Store, profile: &OAuthProfile) -> Result<User> {
    if let Some(user) = store.get_user_by_external_id(&profile.external_id)? {
        return Ok(user);
    }

    let mut new_user = NewUser {
        username: profile.username.clone(),
        external_id: profile.external_id.clone(),
        avatar: profile.avatar.clone(),
        bio: profile.bio.clone(),
    };

    match store.create_user(&new_user) {
        Ok(user) => return Ok(user),
        Err(Error::AlreadyExists) => {}
        Err(e) => return Err(e),
    }

    if let Some(user) = store.get_user_by_external_id(&profile.external_id)? {
        tracing::warn!("User {} was created concurrently", user.username);
        return Ok(user);
    }

    new_user.username = format!("{}-{}", profile.username, profile.external_id);
    match store.create_user(&new_user) {
        Ok(user) => Ok(user),
        Err(Error::AlreadyExists) => store
            .get_user_by_external_id(&profile.external_id)?
            .ok_or(Error::AlreadyExists),
        Err(e) => Err(e),
    }
}
