//! Cache-through fetcher.
//!
//! Results are stored in the persistent cache under
//! `generate_key(identity, filter signature)`. A hit skips the wrapped fetcher
//! entirely, including any optimized/fallback logic inside it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::cache::{DEFAULT_CACHE_TTL, PersistentCache, generate_key};
use crate::domain::{FilterConfig, PullRequest};
use crate::error::Result;
use crate::fetch::Fetcher;

/// Cache shared by every cached fetcher
pub type ItemCache = PersistentCache<Vec<PullRequest>>;

pub struct CachedFetcher {
    inner: Arc<dyn Fetcher>,
    cache: Arc<ItemCache>,
    ttl: Duration,
}

impl CachedFetcher {
    pub fn new(inner: Arc<dyn Fetcher>, cache: Arc<ItemCache>) -> Self {
        Self::with_ttl(inner, cache, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(inner: Arc<dyn Fetcher>, cache: Arc<ItemCache>, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cache key for `filter`
    pub fn cache_key(&self, filter: &FilterConfig) -> String {
        generate_key(&self.inner.identity(), &filter.signature())
    }

    /// Drop the cached result for `filter`. Returns whether one existed.
    pub fn invalidate_cache(&self, filter: &FilterConfig) -> bool {
        let removed = self.cache.remove(&self.cache_key(filter));
        tracing::debug!(source = %self.inner.identity(), removed, "Cache invalidated");
        removed
    }

    /// Fetch through the wrapped fetcher and overwrite the cached result
    pub async fn refresh(&self, filter: &FilterConfig, cancel: &CancellationToken) -> Result<Vec<PullRequest>> {
        let items = self.inner.fetch_items(filter, cancel).await?;
        self.store(filter, &items);
        Ok(items)
    }

    fn store(&self, filter: &FilterConfig, items: &[PullRequest]) {
        if let Err(e) = self.cache.set(&self.cache_key(filter), items.to_vec(), self.ttl) {
            tracing::warn!(source = %self.inner.identity(), error = %e, "Failed to store fetch result");
        }
    }

    /// Re-fetch every `ttl / 2` until cancelled, keeping the entry warm.
    ///
    /// Refresh failures are logged and the previous entry is kept.
    pub async fn background_refresh(&self, filter: FilterConfig, cancel: CancellationToken) {
        let period = (self.ttl / 2).max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh(&filter, &cancel).await {
                        tracing::warn!(source = %self.inner.identity(), error = %e, "Background refresh failed");
                    }
                }
            }
        }
        tracing::debug!(source = %self.inner.identity(), "Background refresh stopped");
    }
}

#[async_trait]
impl Fetcher for CachedFetcher {
    async fn fetch_items(&self, filter: &FilterConfig, cancel: &CancellationToken) -> Result<Vec<PullRequest>> {
        let key = self.cache_key(filter);
        if let Some(items) = self.cache.get(&key) {
            tracing::trace!(source = %self.inner.identity(), key = %key, "Cache hit");
            return Ok(items);
        }

        tracing::trace!(source = %self.inner.identity(), key = %key, "Cache miss");
        self.refresh(filter, cancel).await
    }

    fn identity(&self) -> String {
        self.inner.identity()
    }
}
