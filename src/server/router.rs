use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{
    Router,
    routing::{get, post},
};
use axum_extra::extract::cookie::Key;

use super::response::expose_error_details;
use super::{auth, bookmarks, trending};
use crate::auth::{GithubIdentityProvider, IdentityProvider, SessionStore, cookie_key};
use crate::config::AppConfig;
use crate::enrich::{Enricher, OpenAiBackend};
use crate::error::{Error, Result};
use crate::ingest::TrendingService;
use crate::retry::RetryPolicy;
use crate::store::{SqliteStore, Store};
use crate::upstream::{GithubSource, GitlabSource, USER_AGENT};

const STORE_OPEN_ATTEMPTS: u32 = 5;
const STORE_OPEN_DELAY: Duration = Duration::from_secs(2);

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sessions: SessionStore,
    pub trending: TrendingService,
    pub identity: Arc<dyn IdentityProvider>,
    pub cookie_key: Key,
    /// Mark cookies `Secure`. Set when the public URL is https.
    pub secure_cookies: bool,
    /// Include the underlying cause in internal error bodies.
    pub expose_error_details: bool,
}

impl AppState {
    /// Opens the store and wires every outbound client from configuration.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let store = SqliteStore::connect(
            &config.database,
            &RetryPolicy::fixed(STORE_OPEN_ATTEMPTS, STORE_OPEN_DELAY),
        )
        .await?;
        store.initialize()?;
        let store: Arc<dyn Store> = Arc::new(store);

        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let backend = OpenAiBackend::new(
            client.clone(),
            &config.openai_base_url,
            &config.openai_api_key,
            &config.openai_model,
        );
        let enricher = Arc::new(Enricher::new(Arc::new(backend)));

        let trending = TrendingService::new(store.clone(), enricher)
            .with_source(Arc::new(GithubSource::new(
                client.clone(),
                Some(config.github_token.clone()),
            )))
            .with_source(Arc::new(GitlabSource::new(
                client.clone(),
                Some(config.gitlab_base_url.clone()),
                config.gitlab_token.clone(),
            )))
            .with_concurrency(config.enrich_concurrency);

        let identity = Arc::new(GithubIdentityProvider::new(
            client,
            &config.github_client_id,
            &config.github_client_secret,
            config.oauth_callback_url(),
        ));

        Ok(Self {
            store,
            sessions: SessionStore::new(),
            trending,
            identity,
            cookie_key: cookie_key(&config.session_secret),
            secure_cookies: config.secure_cookies(),
            expose_error_details: !config.production,
        })
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/trending", get(trending::get_trending))
        .route(
            "/bookmarks",
            get(bookmarks::list_bookmarks).post(bookmarks::create_bookmark),
        )
        .route("/me", get(auth::me))
        .route("/auth/github", get(auth::login))
        .route("/auth/github/callback", get(auth::callback))
        .route("/auth/logout", post(auth::logout))
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .nest("/api", api_router());

    if state.expose_error_details {
        router = router.layer(middleware::from_fn(expose_error_details));
    }

    router
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
