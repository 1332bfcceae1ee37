//! Fetcher composition
//!
//! Every source is served by a stack of [`Fetcher`]s:
//!
//! ```text
//! AdmittedFetcher -> CachedFetcher -> OptimizedFetcher -> base strategy
//! ```
//!
//! - the base strategy pages through REST list/search endpoints and applies
//!   the exclusion filter
//! - [`OptimizedFetcher`] tries one consolidated GraphQL query first and falls
//!   back to the base strategy on any failure
//! - [`CachedFetcher`] answers from the persistent cache when it can, so a hit
//!   never reaches the optimized or fallback path
//! - [`AdmittedFetcher`] runs the whole fetch as one admission-controlled
//!   request

mod admitted;
mod cached;
mod exclusion;
mod optimized;
mod strategy;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use admitted::AdmittedFetcher;
pub use cached::{CachedFetcher, ItemCache};
pub use exclusion::ExclusionFilter;
pub use optimized::OptimizedFetcher;
pub use strategy::{FAN_OUT_CONCURRENCY, LabelSearchStrategy, MAX_PAGES, OrgStrategy, QueryStrategy, RepoListStrategy};

use crate::api::ReviewApi;
use crate::domain::{FilterConfig, PullRequest, SourceSpec};
use crate::error::Result;

/// Produces the items of one source
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch items under `filter`; must abort promptly when `cancel` fires
    async fn fetch_items(&self, filter: &FilterConfig, cancel: &CancellationToken) -> Result<Vec<PullRequest>>;

    /// Stable description of what this fetcher lists, used in cache keys
    fn identity(&self) -> String;
}

/// Base strategy for a source
pub fn build_strategy(spec: &SourceSpec, api: Arc<dyn ReviewApi>) -> Arc<dyn Fetcher> {
    match spec {
        SourceSpec::Repos(repos) => Arc::new(RepoListStrategy::new(api, repos.clone())),
        SourceSpec::Org(org) => Arc::new(OrgStrategy::new(api, org.clone())),
        SourceSpec::Label(label) => Arc::new(LabelSearchStrategy::new(api, label.clone())),
        SourceSpec::Topic(_) | SourceSpec::Query(_) => Arc::new(QueryStrategy::new(api, spec.search_qualifiers())),
    }
}

/// `Cached(Optimized(strategy))` for a source
pub fn build_fetcher(
    spec: &SourceSpec,
    api: Arc<dyn ReviewApi>,
    cache: Arc<ItemCache>,
    ttl: Duration,
) -> Arc<CachedFetcher> {
    let base = build_strategy(spec, Arc::clone(&api));
    let optimized: Arc<dyn Fetcher> = Arc::new(OptimizedFetcher::new(api, base, spec.search_qualifiers()));
    Arc::new(CachedFetcher::with_ttl(optimized, cache, ttl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockReviewApi;
    use tempfile::TempDir;

    #[test]
    fn test_strategy_identities() {
        let api: Arc<dyn ReviewApi> = Arc::new(MockReviewApi::new());
        let cases = [
            ("repos:o/a,o/b", "repos:o/a,o/b"),
            ("org:acme", "org:acme"),
            ("label:bug", "label:bug"),
            ("topic:rust", "query:topic:rust"),
            ("query:is:pr author:me", "query:is:pr author:me"),
        ];
        for (input, identity) in cases {
            let spec = SourceSpec::parse(input).unwrap();
            assert_eq!(build_strategy(&spec, Arc::clone(&api)).identity(), identity);
        }
    }

    #[tokio::test]
    async fn test_composed_fetcher_caches_after_fallback() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(MockReviewApi::new().with_repo("o/r", vec![PullRequest::new("o/r", 1, "PR", "dev")]));
        let cache = Arc::new(ItemCache::open(dir.path()).unwrap());
        let spec = SourceSpec::parse("repos:o/r").unwrap();
        let fetcher = build_fetcher(&spec, api.clone(), cache, Duration::from_secs(300));
        let cancel = CancellationToken::new();

        let first = fetcher.fetch_items(&FilterConfig::default(), &cancel).await.unwrap();
        let second = fetcher.fetch_items(&FilterConfig::default(), &cancel).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(api.graphql_calls(), 1);
        assert_eq!(api.list_calls(), 1);
    }
}
