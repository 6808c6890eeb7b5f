use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use axum_extra::extract::cookie::{Cookie, Key, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha512};

pub const SESSION_COOKIE: &str = "trendscope_session";
pub const OAUTH_STATE_COOKIE: &str = "oauth_state";

const SESSION_TTL_HOURS: i64 = 24;
const OAUTH_STATE_TTL_MINUTES: i64 = 10;
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// In-memory sessions keyed by an opaque random id.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(Duration::hours(SESSION_TTL_HOURS))
    }

    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create(&self, user_id: i64) -> Session {
        let session = Session {
            id: random_token(),
            user_id,
            expires_at: Utc::now() + self.ttl,
        };
        self.write().insert(session.id.clone(), session.clone());
        session
    }

    /// Returns the live session for `id`. Expired entries are dropped.
    pub fn get(&self, id: &str) -> Option<Session> {
        let now = Utc::now();
        let session = self.read().get(id).cloned()?;
        if session.is_expired(now) {
            self.write().remove(id);
            return None;
        }
        Some(session)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.write().remove(id).is_some()
    }

    /// Drops every expired session and returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// 32 random bytes, URL-safe base64 without padding.
#[must_use]
pub fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Derives the cookie signing key from the configured session secret.
#[must_use]
pub fn cookie_key(secret: &str) -> Key {
    Key::from(Sha512::digest(secret.as_bytes()).as_slice())
}

#[must_use]
pub fn session_cookie(session_id: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::hours(SESSION_TTL_HOURS))
        .build()
}

#[must_use]
pub fn oauth_state_cookie(state: String, secure: bool) -> Cookie<'static> {
    Cookie::build((OAUTH_STATE_COOKIE, state))
        .path("/api/auth")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(time::Duration::minutes(OAUTH_STATE_TTL_MINUTES))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_get() {
        let store = SessionStore::new();
        let session = store.create(7);

        let fetched = store.get(&session.id).unwrap();
        assert_eq!(fetched.user_id, 7);
        assert!(store.get("unknown").is_none());
    }

    #[test]
    fn session_ids_are_unique_and_url_safe() {
        let store = SessionStore::new();
        let a = store.create(1);
        let b = store.create(1);

        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 43);
        assert!(a.id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn expired_sessions_are_dropped_on_access() {
        let store = SessionStore::with_ttl(Duration::seconds(-1));
        let session = store.create(1);

        assert!(store.get(&session.id).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn prune_removes_only_expired() {
        let store = SessionStore::new();
        let live = store.create(1);
        store.write().insert(
            "stale".to_string(),
            Session {
                id: "stale".to_string(),
                user_id: 2,
                expires_at: Utc::now() - Duration::minutes(1),
            },
        );

        assert_eq!(store.prune_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(&live.id).is_some());
    }

    #[test]
    fn remove_is_idempotent() {
        let store = SessionStore::new();
        let session = store.create(1);

        assert!(store.remove(&session.id));
        assert!(!store.remove(&session.id));
    }

    #[test]
    fn session_cookie_attributes() {
        let cookie = session_cookie("abc".to_string(), true);
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(time::Duration::hours(24)));
    }
}
