mod middleware;
mod oauth;
mod session;

pub use middleware::{AuthError, RequireSession, RequireUser};
pub use oauth::{
    GithubIdentityProvider, IdentityProvider, OAuthError, OAuthProfile, find_or_create_user,
};
pub use session::{
    OAUTH_STATE_COOKIE, SESSION_COOKIE, Session, SessionStore, cookie_key, oauth_state_cookie,
    random_token, session_cookie,
};
