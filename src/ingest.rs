//! Trending ingestion: fetch from upstream, enrich unseen repositories once,
//! cache them, and project them for clients.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use thiserror::Error;

use crate::enrich::Enricher;
use crate::error::Error;
use crate::store::{InsertOutcome, Store};
use crate::types::{Platform, Repository, RepositoryView};
use crate::upstream::{SourceError, TrendingQuery, TrendingSource, UpstreamRepo};

pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{} is not a supported platform", .0.display_name())]
    UnsupportedPlatform(Platform),
    #[error("{} API credentials are not configured", .0.display_name())]
    MissingCredentials(Platform),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] Error),
}

pub struct TrendingService {
    store: Arc<dyn Store>,
    sources: HashMap<Platform, Arc<dyn TrendingSource>>,
    enricher: Arc<Enricher>,
    concurrency: usize,
}

impl TrendingService {
    pub fn new(store: Arc<dyn Store>, enricher: Arc<Enricher>) -> Self {
        Self {
            store,
            sources: HashMap::new(),
            enricher,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Registers `source` for its platform, replacing any earlier one.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn TrendingSource>) -> Self {
        self.sources.insert(source.platform(), source);
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn supports(&self, platform: Platform) -> bool {
        self.sources.contains_key(&platform)
    }

    /// Returns the current trending page for `query`, in upstream order.
    ///
    /// Repositories seen before are served from the store as-is; new ones are
    /// enriched and persisted first. Any upstream or store failure fails the
    /// whole call.
    pub async fn trending(
        &self,
        query: &TrendingQuery,
    ) -> Result<Vec<RepositoryView>, IngestError> {
        let source = self
            .sources
            .get(&query.platform)
            .ok_or(IngestError::UnsupportedPlatform(query.platform))?;

        if !source.has_credentials() {
            return Err(IngestError::MissingCredentials(query.platform));
        }

        let items = source.fetch_trending(query).await.inspect_err(|e| {
            tracing::warn!("Trending fetch for {} failed: {e}", query.platform);
        })?;
        tracing::debug!(count = items.len(), platform = %query.platform, "Fetched trending page");

        let rows: Vec<Repository> = stream::iter(items)
            .map(|item| self.resolve(item))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        Ok(rows.into_iter().map(RepositoryView::from).collect())
    }

    async fn resolve(&self, item: UpstreamRepo) -> Result<Repository, IngestError> {
        if let Some(existing) = self
            .store
            .get_repository_by_platform_id(item.platform, &item.platform_id)?
        {
            return Ok(existing);
        }

        let analysis = self
            .enricher
            .analyze(&item.name, item.description.as_deref())
            .await;

        match self.store.insert_repository(&item.into_new_repository(analysis))? {
            InsertOutcome::Created(repo) => Ok(repo),
            InsertOutcome::Existing(repo) => {
                tracing::warn!(
                    "Repository {} was inserted concurrently; keeping row {}",
                    repo.name,
                    repo.id
                );
                Ok(repo)
            }
        }
    }
}
