//! In-memory [`ReviewApi`] for tests and offline runs
//!
//! Serves canned pull requests, paginates them like the real service, counts
//! every call and can be told to fail specific repositories or the GraphQL
//! endpoint.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::api::client::{GraphqlResponse, Page, ReviewApi};
use crate::domain::{EnhancedItem, FilterConfig, PullRequest};
use crate::error::{PrwatchError, Result};

#[derive(Debug, Default)]
struct MockState {
    repos: HashMap<String, Vec<PullRequest>>,
    orgs: HashMap<String, Vec<String>>,
    /// Search hits keyed by a qualifier the query must contain
    searches: Vec<(String, Vec<PullRequest>)>,
    graphql: Option<Value>,
    details: HashMap<String, EnhancedItem>,
    failing_repos: HashSet<String>,
    fail_search: bool,
    fail_details: bool,
}

/// Canned review API
#[derive(Debug)]
pub struct MockReviewApi {
    state: Mutex<MockState>,
    per_page: usize,
    delay: Duration,
    list_calls: AtomicUsize,
    search_calls: AtomicUsize,
    org_calls: AtomicUsize,
    graphql_calls: AtomicUsize,
    detail_calls: AtomicUsize,
}

impl Default for MockReviewApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockReviewApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            per_page: 30,
            delay: Duration::ZERO,
            list_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
            org_calls: AtomicUsize::new(0),
            graphql_calls: AtomicUsize::new(0),
            detail_calls: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Page size used when paginating canned data
    pub fn with_per_page(mut self, per_page: usize) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    /// Latency added to every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_repo(self, repo: &str, pulls: Vec<PullRequest>) -> Self {
        self.lock().repos.insert(repo.to_string(), pulls);
        self
    }

    pub fn with_org(self, org: &str, repos: &[&str]) -> Self {
        self.lock()
            .orgs
            .insert(org.to_string(), repos.iter().map(|r| r.to_string()).collect());
        self
    }

    /// Search hits returned for any query containing `qualifier`
    pub fn with_search(self, qualifier: &str, pulls: Vec<PullRequest>) -> Self {
        self.lock().searches.push((qualifier.to_string(), pulls));
        self
    }

    /// Raw GraphQL response body; without one every GraphQL call fails
    pub fn with_graphql(self, body: Value) -> Self {
        self.lock().graphql = Some(body);
        self
    }

    pub fn with_detail(self, item_key: &str, detail: EnhancedItem) -> Self {
        self.lock().details.insert(item_key.to_string(), detail);
        self
    }

    pub fn fail_repo(&self, repo: &str) {
        self.lock().failing_repos.insert(repo.to_string());
    }

    pub fn set_fail_search(&self, fail: bool) {
        self.lock().fail_search = fail;
    }

    pub fn set_fail_details(&self, fail: bool) {
        self.lock().fail_details = fail;
    }

    /// Replace a repository's pull requests
    pub fn set_repo(&self, repo: &str, pulls: Vec<PullRequest>) {
        self.lock().repos.insert(repo.to_string(), pulls);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn org_calls(&self) -> usize {
        self.org_calls.load(Ordering::SeqCst)
    }

    pub fn graphql_calls(&self) -> usize {
        self.graphql_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    /// Total calls of every kind
    pub fn total_calls(&self) -> usize {
        self.list_calls() + self.search_calls() + self.org_calls() + self.graphql_calls() + self.detail_calls()
    }

    async fn latency(&self, cancel: &CancellationToken) -> Result<()> {
        if self.delay.is_zero() {
            return if cancel.is_cancelled() {
                Err(PrwatchError::Cancelled)
            } else {
                Ok(())
            };
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(PrwatchError::Cancelled),
            _ = tokio::time::sleep(self.delay) => Ok(()),
        }
    }

    fn paginate<T: Clone>(&self, items: &[T], page: u32) -> Page<T> {
        let start = (page.max(1) as usize - 1) * self.per_page;
        let end = (start + self.per_page).min(items.len());
        if start >= items.len() {
            return Page::last(Vec::new());
        }
        Page::new(items[start..end].to_vec(), end < items.len())
    }
}

#[async_trait]
impl ReviewApi for MockReviewApi {
    async fn list_pulls(
        &self,
        repo: &str,
        filter: &FilterConfig,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Page<PullRequest>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.latency(cancel).await?;

        let pulls = {
            let state = self.lock();
            if state.failing_repos.contains(repo) {
                return Err(PrwatchError::Transport(format!("connection reset listing {}", repo)));
            }
            state
                .repos
                .get(repo)
                .cloned()
                .ok_or_else(|| PrwatchError::Api {
                    status: 404,
                    message: format!("repository {} not found", repo),
                })?
        };
        let pulls: Vec<PullRequest> = pulls
            .into_iter()
            .filter(|p| filter.state == "all" || p.state == filter.state)
            .collect();
        Ok(self.paginate(&pulls, page))
    }

    async fn search_pulls(&self, query: &str, page: u32, cancel: &CancellationToken) -> Result<Page<PullRequest>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.latency(cancel).await?;

        let hits: Vec<PullRequest> = {
            let state = self.lock();
            if state.fail_search {
                return Err(PrwatchError::Transport("search unavailable".to_string()));
            }
            state
                .searches
                .iter()
                .filter(|(qualifier, _)| query.contains(qualifier.as_str()))
                .flat_map(|(_, pulls)| pulls.iter().cloned())
                .collect()
        };
        Ok(self.paginate(&hits, page))
    }

    async fn list_org_repos(&self, org: &str, page: u32, cancel: &CancellationToken) -> Result<Page<String>> {
        self.org_calls.fetch_add(1, Ordering::SeqCst);
        self.latency(cancel).await?;

        let repos = self.lock().orgs.get(org).cloned().ok_or_else(|| PrwatchError::Api {
            status: 404,
            message: format!("organization {} not found", org),
        })?;
        Ok(self.paginate(&repos, page))
    }

    async fn graphql(&self, _query: &str, _variables: Value, cancel: &CancellationToken) -> Result<GraphqlResponse> {
        self.graphql_calls.fetch_add(1, Ordering::SeqCst);
        self.latency(cancel).await?;

        match self.lock().graphql.clone() {
            Some(body) => Ok(GraphqlResponse::from_value(body)),
            None => Err(PrwatchError::Api {
                status: 502,
                message: "graphql unavailable".to_string(),
            }),
        }
    }

    async fn pull_detail(&self, pr: &PullRequest, cancel: &CancellationToken) -> Result<EnhancedItem> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.latency(cancel).await?;

        let state = self.lock();
        if state.fail_details {
            return Err(PrwatchError::Transport(format!("detail failed for {}", pr.item_key())));
        }
        Ok(state.details.get(&pr.item_key()).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulls(repo: &str, n: u64) -> Vec<PullRequest> {
        (1..=n).map(|i| PullRequest::new(repo, i, format!("PR {}", i), "dev")).collect()
    }

    #[tokio::test]
    async fn test_pagination() {
        let api = MockReviewApi::new().with_per_page(2).with_repo("o/r", pulls("o/r", 5));
        let cancel = CancellationToken::new();
        let filter = FilterConfig::default();

        let first = api.list_pulls("o/r", &filter, 1, &cancel).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.has_next);
        let last = api.list_pulls("o/r", &filter, 3, &cancel).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(!last.has_next);
        assert_eq!(api.list_calls(), 2);
    }

    #[tokio::test]
    async fn test_failing_repo_and_missing_graphql() {
        let api = MockReviewApi::new().with_repo("o/r", pulls("o/r", 1));
        api.fail_repo("o/r");
        let cancel = CancellationToken::new();
        assert!(
            api.list_pulls("o/r", &FilterConfig::default(), 1, &cancel)
                .await
                .is_err()
        );
        assert!(api.graphql("{}", Value::Null, &cancel).await.is_err());
        assert_eq!(api.graphql_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_call() {
        let api = MockReviewApi::new()
            .with_delay(Duration::from_secs(5))
            .with_search("label:bug", Vec::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = api.search_pulls("is:pr label:bug", 1, &cancel).await;
        assert!(matches!(result, Err(PrwatchError::Cancelled)));
    }
}
