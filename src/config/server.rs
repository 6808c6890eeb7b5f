use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

/// Location of the SQLite database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    File(PathBuf),
    Memory,
}

impl DatabaseUrl {
    /// Accepts `sqlite://<path>` or `sqlite::memory:`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw == "sqlite::memory:" {
            return Ok(DatabaseUrl::Memory);
        }
        match raw.strip_prefix("sqlite://") {
            Some(path) if !path.is_empty() => Ok(DatabaseUrl::File(PathBuf::from(path))),
            _ => Err(Error::Config(format!(
                "malformed DATABASE_URL '{raw}': expected sqlite://<path> or sqlite::memory:"
            ))),
        }
    }
}

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ENRICH_CONCURRENCY: usize = 8;

/// Environment as read by `envy`. Every field is optional here so that all
/// missing variables can be reported together.
#[derive(Debug, Deserialize)]
struct RawEnv {
    database_url: Option<String>,
    github_token: Option<String>,
    github_client_id: Option<String>,
    github_client_secret: Option<String>,
    app_url: Option<String>,
    openai_api_key: Option<String>,
    openai_base_url: Option<String>,
    openai_model: Option<String>,
    gitlab_token: Option<String>,
    gitlab_base_url: Option<String>,
    session_secret: Option<String>,
    trendscope_http_timeout_secs: Option<String>,
    trendscope_enrich_concurrency: Option<String>,
    app_env: Option<String>,
}

impl RawEnv {
    /// Blank values count as unset.
    fn non_blank(self) -> Self {
        let keep = |v: Option<String>| v.filter(|v| !v.trim().is_empty());
        Self {
            database_url: keep(self.database_url),
            github_token: keep(self.github_token),
            github_client_id: keep(self.github_client_id),
            github_client_secret: keep(self.github_client_secret),
            app_url: keep(self.app_url),
            openai_api_key: keep(self.openai_api_key),
            openai_base_url: keep(self.openai_base_url),
            openai_model: keep(self.openai_model),
            gitlab_token: keep(self.gitlab_token),
            gitlab_base_url: keep(self.gitlab_base_url),
            session_secret: keep(self.session_secret),
            trendscope_http_timeout_secs: keep(self.trendscope_http_timeout_secs),
            trendscope_enrich_concurrency: keep(self.trendscope_enrich_concurrency),
            app_env: keep(self.app_env),
        }
    }
}

/// Runtime configuration read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseUrl,
    pub github_token: String,
    pub github_client_id: String,
    pub github_client_secret: String,
    /// Public base URL of this service, used to build the OAuth callback URL.
    pub app_url: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub gitlab_token: Option<String>,
    pub gitlab_base_url: String,
    pub session_secret: String,
    pub http_timeout: Duration,
    pub enrich_concurrency: usize,
    pub production: bool,
}

fn env_error(e: envy::Error) -> Error {
    Error::Config(format!("failed to load config from environment: {e}"))
}

fn required(
    value: Option<String>,
    key: &'static str,
    missing: &mut Vec<&'static str>,
) -> String {
    value.unwrap_or_else(|| {
        missing.push(key);
        String::new()
    })
}

fn base_url(value: Option<String>, default: &str) -> String {
    value
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

impl AppConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let raw = envy::from_env::<RawEnv>().map_err(env_error)?;
        Self::from_raw(raw)
    }

    /// Builds the configuration from explicit `(NAME, value)` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let raw = envy::from_iter::<_, RawEnv>(vars).map_err(env_error)?;
        Self::from_raw(raw)
    }

    /// Every missing required variable is reported in one error.
    fn from_raw(raw: RawEnv) -> Result<Self> {
        let raw = raw.non_blank();
        let mut missing = Vec::new();

        let database_url = required(raw.database_url, "DATABASE_URL", &mut missing);
        let github_token = required(raw.github_token, "GITHUB_TOKEN", &mut missing);
        let github_client_id = required(raw.github_client_id, "GITHUB_CLIENT_ID", &mut missing);
        let github_client_secret =
            required(raw.github_client_secret, "GITHUB_CLIENT_SECRET", &mut missing);
        let app_url = required(raw.app_url, "APP_URL", &mut missing);
        let openai_api_key = required(raw.openai_api_key, "OPENAI_API_KEY", &mut missing);
        let session_secret = required(raw.session_secret, "SESSION_SECRET", &mut missing);

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let database = DatabaseUrl::parse(&database_url)?;

        let http_timeout_secs = match raw.trendscope_http_timeout_secs {
            Some(v) => v.parse::<u64>().map_err(|_| {
                Error::Config(format!("TRENDSCOPE_HTTP_TIMEOUT_SECS must be an integer, got '{v}'"))
            })?,
            None => DEFAULT_HTTP_TIMEOUT_SECS,
        };

        let enrich_concurrency = match raw.trendscope_enrich_concurrency {
            Some(v) => v.parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(|| {
                Error::Config(format!(
                    "TRENDSCOPE_ENRICH_CONCURRENCY must be a positive integer, got '{v}'"
                ))
            })?,
            None => DEFAULT_ENRICH_CONCURRENCY,
        };

        Ok(Self {
            database,
            github_token,
            github_client_id,
            github_client_secret,
            app_url: app_url.trim_end_matches('/').to_string(),
            openai_api_key,
            openai_base_url: base_url(raw.openai_base_url, "https://api.openai.com"),
            openai_model: raw.openai_model.unwrap_or_else(|| "gpt-4".to_string()),
            gitlab_token: raw.gitlab_token,
            gitlab_base_url: base_url(raw.gitlab_base_url, "https://gitlab.com"),
            session_secret,
            http_timeout: Duration::from_secs(http_timeout_secs),
            enrich_concurrency,
            production: raw
                .app_env
                .is_some_and(|v| v.eq_ignore_ascii_case("production")),
        })
    }

    #[must_use]
    pub fn oauth_callback_url(&self) -> String {
        format!("{}/api/auth/github/callback", self.app_url)
    }

    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.app_url.starts_with("https://")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn full_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "sqlite://./data/trendscope.db"),
            ("GITHUB_TOKEN", "ghp_test"),
            ("GITHUB_CLIENT_ID", "client"),
            ("GITHUB_CLIENT_SECRET", "secret"),
            ("APP_URL", "https://trendscope.example.com/"),
            ("OPENAI_API_KEY", "sk-test"),
            ("SESSION_SECRET", "a-long-session-secret"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<AppConfig> {
        AppConfig::from_vars(env.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    #[test]
    fn loads_required_and_defaults() {
        let config = load(&full_env()).unwrap();
        assert_eq!(
            config.database,
            DatabaseUrl::File(PathBuf::from("./data/trendscope.db"))
        );
        assert_eq!(config.app_url, "https://trendscope.example.com");
        assert_eq!(
            config.oauth_callback_url(),
            "https://trendscope.example.com/api/auth/github/callback"
        );
        assert_eq!(config.openai_model, "gpt-4");
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.enrich_concurrency, 8);
        assert!(config.secure_cookies());
        assert!(!config.production);
        assert!(config.gitlab_token.is_none());
    }

    #[test]
    fn reports_every_missing_variable() {
        let mut env = full_env();
        env.remove("GITHUB_TOKEN");
        env.insert("SESSION_SECRET", "   ");

        let err = load(&env).unwrap_err().to_string();
        assert!(err.contains("GITHUB_TOKEN"));
        assert!(err.contains("SESSION_SECRET"));
        assert!(!err.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn rejects_malformed_database_url() {
        let mut env = full_env();
        env.insert("DATABASE_URL", "postgresql://user@host/db");
        assert!(matches!(load(&env), Err(Error::Config(_))));

        assert_eq!(DatabaseUrl::parse("sqlite::memory:").unwrap(), DatabaseUrl::Memory);
        assert!(DatabaseUrl::parse("sqlite://").is_err());
    }

    #[test]
    fn rejects_bad_numeric_overrides() {
        let mut env = full_env();
        env.insert("TRENDSCOPE_ENRICH_CONCURRENCY", "0");
        assert!(load(&env).is_err());

        let mut env = full_env();
        env.insert("TRENDSCOPE_HTTP_TIMEOUT_SECS", "soon");
        assert!(load(&env).is_err());
    }

    #[test]
    fn optional_overrides_are_applied() {
        let mut env = full_env();
        env.insert("OPENAI_BASE_URL", "http://localhost:8080/");
        env.insert("OPENAI_MODEL", "gpt-4o-mini");
        env.insert("GITLAB_TOKEN", "glpat-test");
        env.insert("GITLAB_BASE_URL", "   ");
        env.insert("TRENDSCOPE_HTTP_TIMEOUT_SECS", "5");
        env.insert("TRENDSCOPE_ENRICH_CONCURRENCY", "2");
        env.insert("APP_ENV", "Production");

        let config = load(&env).unwrap();
        assert_eq!(config.openai_base_url, "http://localhost:8080");
        assert_eq!(config.openai_model, "gpt-4o-mini");
        assert_eq!(config.gitlab_token.as_deref(), Some("glpat-test"));
        assert_eq!(config.gitlab_base_url, "https://gitlab.com");
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(config.enrich_concurrency, 2);
        assert!(config.production);
    }

    #[test]
    fn unrelated_variables_are_ignored() {
        let mut vars: Vec<(String, String)> = full_env()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        vars.push(("PATH".to_string(), "/usr/bin".to_string()));
        vars.push(("HOME".to_string(), "/root".to_string()));

        assert!(AppConfig::from_vars(vars).is_ok());
    }
}
