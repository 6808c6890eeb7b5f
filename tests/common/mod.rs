//! In-process test harness: the real router and store, with stub upstreams.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use trendscope::auth::{
    IdentityProvider, OAuthError, OAuthProfile, SessionStore, cookie_key,
};
use trendscope::enrich::{CompletionBackend, CompletionError, Enricher};
use trendscope::ingest::TrendingService;
use trendscope::retry::RetryPolicy;
use trendscope::server::{AppState, create_router};
use trendscope::store::{SqliteStore, Store};
use trendscope::types::{Platform, PlatformData};
use trendscope::upstream::{SourceError, TrendingQuery, TrendingSource, UpstreamRepo};

pub const GOOD_CODE: &str = "good-code";

pub struct StubSource {
    pub credentials: bool,
    pub items: Mutex<Vec<UpstreamRepo>>,
    pub failure: Mutex<Option<u16>>,
    pub calls: AtomicU32,
}

impl StubSource {
    /// Fails every fetch as if upstream answered with `status`.
    pub fn fail_with(&self, status: u16) {
        *self.failure.lock().unwrap() = Some(status);
    }
}

#[async_trait]
impl TrendingSource for StubSource {
    fn platform(&self) -> Platform {
        Platform::Github
    }

    fn has_credentials(&self) -> bool {
        self.credentials
    }

    async fn fetch_trending(
        &self,
        query: &TrendingQuery,
    ) -> Result<Vec<UpstreamRepo>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match *self.failure.lock().unwrap() {
            Some(429) => {
                return Err(SourceError::RateLimited {
                    platform: Platform::Github,
                });
            }
            Some(status) => {
                return Err(SourceError::Status {
                    platform: Platform::Github,
                    status,
                });
            }
            None => {}
        }

        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.stars >= u64::from(query.min_stars))
            .filter(|r| query.language.is_none() || r.language == query.language)
            .cloned()
            .collect())
    }
}

/// Completion backend whose answer can be swapped mid-test.
pub struct StubBackend {
    pub answer: Mutex<Result<String, u16>>,
    pub calls: AtomicU32,
}

impl StubBackend {
    pub fn answer_with(&self, suggestions: [&str; 3]) {
        *self.answer.lock().unwrap() = Ok(serde_json::json!({
            "suggestions": suggestions,
            "topKeywords": ["demo"],
            "domainCategory": "Web Development",
            "trendingScore": 70
        })
        .to_string());
    }

    pub fn fail_with(&self, status: u16) {
        *self.answer.lock().unwrap() = Err(status);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionBackend for StubBackend {
    async fn complete_json(&self, _prompt: &str) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
            .lock()
            .unwrap()
            .clone()
            .map_err(|status| CompletionError::Status {
                status,
                body: String::new(),
            })
    }
}

pub struct StubIdentity;

#[async_trait]
impl IdentityProvider for StubIdentity {
    fn authorize_url(&self, state: &str) -> String {
        format!("https://idp.example.com/authorize?state={state}")
    }

    async fn fetch_profile(&self, code: &str) -> Result<OAuthProfile, OAuthError> {
        if code != GOOD_CODE {
            return Err(OAuthError::TokenExchange("bad_verification_code".to_string()));
        }
        Ok(OAuthProfile {
            external_id: "583231".to_string(),
            username: "octocat".to_string(),
            avatar: Some("https://avatars.example.com/u/583231".to_string()),
            bio: Some("Mascot".to_string()),
        })
    }
}

pub fn demo_repo() -> UpstreamRepo {
    UpstreamRepo {
        platform: Platform::Github,
        platform_id: "42".to_string(),
        name: "acme/demo".to_string(),
        description: Some("A demo repository".to_string()),
        language: Some("Rust".to_string()),
        stars: 1500,
        forks: 12,
        url: "https://github.com/acme/demo".to_string(),
        platform_data: PlatformData::Github {
            owner: "acme".to_string(),
            repo: "demo".to_string(),
            topics: vec!["cli".to_string()],
            license: Some("MIT".to_string()),
        },
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub source: Arc<StubSource>,
    pub backend: Arc<StubBackend>,
}

pub struct Options {
    pub credentials: bool,
    pub expose_error_details: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            credentials: true,
            expose_error_details: true,
        }
    }
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        let store = SqliteStore::in_memory().expect("open store");
        store.initialize().expect("initialize store");
        let store: Arc<dyn Store> = Arc::new(store);

        let source = Arc::new(StubSource {
            credentials: options.credentials,
            items: Mutex::new(vec![demo_repo()]),
            failure: Mutex::new(None),
            calls: AtomicU32::new(0),
        });
        let backend = Arc::new(StubBackend {
            answer: Mutex::new(Err(500)),
            calls: AtomicU32::new(0),
        });
        backend.answer_with(["Read the parser", "Add a CLI flag", "Write a benchmark"]);

        let enricher = Enricher::new(backend.clone()).with_retry_policy(RetryPolicy::immediate(3));
        let trending =
            TrendingService::new(store.clone(), Arc::new(enricher)).with_source(source.clone());

        let state = Arc::new(AppState {
            store,
            sessions: SessionStore::new(),
            trending,
            identity: Arc::new(StubIdentity),
            cookie_key: cookie_key("test-session-secret"),
            secure_cookies: false,
            expose_error_details: options.expose_error_details,
        });

        Self {
            state,
            source,
            backend,
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let resp = self.router().oneshot(request).await.expect("request");
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.into_body().collect().await.expect("body").to_bytes();
        (status, headers, body.to_vec())
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let (status, _, body) = self.send(builder.body(Body::empty()).unwrap()).await;
        (status, parse_json(&body))
    }

    pub async fn post_json(
        &self,
        uri: &str,
        body: &str,
        cookie: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let (status, _, body) = self
            .send(builder.body(Body::from(body.to_string())).unwrap())
            .await;
        (status, parse_json(&body))
    }

    /// Runs the OAuth round trip against the stub provider and returns the
    /// session cookie (`name=value`).
    pub async fn sign_in(&self) -> String {
        let (status, headers, _) = self
            .send(Request::builder().uri("/api/auth/github").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::SEE_OTHER);

        let location = headers[header::LOCATION].to_str().unwrap();
        let state = location.split("state=").nth(1).expect("state param");
        let state_cookie = set_cookie(&headers, "oauth_state").expect("state cookie");

        let (status, headers, _) = self
            .send(
                Request::builder()
                    .uri(format!("/api/auth/github/callback?code={GOOD_CODE}&state={state}"))
                    .header(header::COOKIE, state_cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers[header::LOCATION], "/");

        set_cookie(&headers, "trendscope_session").expect("session cookie")
    }
}

/// Returns `name=value` of the named `Set-Cookie` header, if present.
pub fn set_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{name}=")))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

fn parse_json(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}
