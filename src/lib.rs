//! # Trendscope
//!
//! A trending-repository discovery service: it pulls trending repositories from
//! code hosting platforms, caches them together with a one-time AI analysis, and
//! serves them over a JSON API with GitHub sign-in and per-user bookmarks.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! trendscope = { version = "0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trendscope::config::AppConfig;
//! use trendscope::server::{AppState, create_router};
//!
//! let config = AppConfig::from_env()?;
//! let state = AppState::from_config(&config).await?;
//! let router = create_router(Arc::new(state));
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Builds the `trendscope` binary. Disable with `default-features = false`.

pub mod auth;
pub mod config;
pub mod enrich;
pub mod error;
pub mod ingest;
pub mod retry;
pub mod server;
pub mod store;
pub mod types;
pub mod upstream;
