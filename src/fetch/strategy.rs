//! Base fetch strategies, one per source kind.
//!
//! Each strategy paginates the remote API until it runs out of pages or hits
//! the filter's result cap, then applies the exclusion filter. Strategies that
//! fan out over several repositories absorb per-repository failures and only
//! fail when every repository failed.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::api::{Page, ReviewApi};
use crate::domain::{FilterConfig, PullRequest};
use crate::error::{PrwatchError, Result};
use crate::fetch::Fetcher;
use crate::fetch::exclusion::ExclusionFilter;

/// Safety bound on pages fetched for one listing
pub const MAX_PAGES: u32 = 50;

/// Repositories listed concurrently during a fan-out
pub const FAN_OUT_CONCURRENCY: usize = 4;

/// Fetch pages until the last page, an empty page, or `max_results` items
pub(crate) async fn collect_pages<T, F, Fut>(max_results: usize, cancel: &CancellationToken, mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    for page in 1..=MAX_PAGES {
        if cancel.is_cancelled() {
            return Err(PrwatchError::Cancelled);
        }
        let Page { items: batch, has_next } = fetch_page(page).await?;
        let empty = batch.is_empty();
        items.extend(batch);
        if !has_next || empty || items.len() >= max_results {
            break;
        }
    }
    items.truncate(max_results);
    Ok(items)
}

/// Search query for `qualifiers` under `filter`'s state and ordering
pub(crate) fn build_search_query(qualifiers: &str, filter: &FilterConfig) -> String {
    let mut parts = vec!["is:pr".to_string()];
    if filter.state != "all" {
        parts.push(format!("is:{}", filter.state));
    }
    if !filter.include_drafts {
        parts.push("draft:false".to_string());
    }
    parts.push(qualifiers.to_string());
    parts.push(format!("sort:{}-{}", filter.sort, filter.direction));
    parts.join(" ")
}

/// List one repository's pull requests up to the result cap
async fn list_repo(
    api: Arc<dyn ReviewApi>,
    repo: String,
    filter: FilterConfig,
    cancel: CancellationToken,
) -> (String, Result<Vec<PullRequest>>) {
    let result = {
        let (api, name, filter, cancel) = (&api, repo.as_str(), &filter, &cancel);
        collect_pages(filter.max_results, cancel, |page| async move {
            api.list_pulls(name, filter, page, cancel).await
        })
        .await
    };
    (repo, result)
}

/// List every repository, absorbing individual failures
async fn fan_out(
    api: &Arc<dyn ReviewApi>,
    repos: &[String],
    filter: &FilterConfig,
    cancel: &CancellationToken,
) -> Result<Vec<PullRequest>> {
    let jobs = repos
        .iter()
        .map(|repo| list_repo(Arc::clone(api), repo.clone(), filter.clone(), cancel.clone()))
        .collect::<Vec<_>>();
    let results: Vec<(String, Result<Vec<PullRequest>>)> =
        stream::iter(jobs).buffered(FAN_OUT_CONCURRENCY).collect().await;

    if cancel.is_cancelled() {
        return Err(PrwatchError::Cancelled);
    }

    let total = results.len();
    let mut items = Vec::new();
    let mut errors = Vec::new();
    let mut last_error = None;
    for (repo, result) in results {
        match result {
            Ok(pulls) => items.extend(pulls),
            Err(e) => {
                tracing::warn!(repo = %repo, error = %e, "Repository fetch failed");
                errors.push(format!("{}: {}", repo, e));
                last_error = Some(e);
            }
        }
    }

    if total > 0 && errors.len() == total {
        // A single repository keeps its own error so callers can classify it.
        if let (1, Some(e)) = (total, last_error) {
            return Err(e);
        }
        return Err(PrwatchError::PartialFailure {
            failed: errors.len(),
            total,
            errors,
        });
    }
    if !errors.is_empty() {
        tracing::info!(failed = errors.len(), total, "Partial fan-out failure absorbed");
    }

    items.truncate(filter.max_results);
    Ok(items)
}

/// Pull requests of an explicit repository list
pub struct RepoListStrategy {
    api: Arc<dyn ReviewApi>,
    repos: Vec<String>,
}

impl RepoListStrategy {
    pub fn new(api: Arc<dyn ReviewApi>, repos: Vec<String>) -> Self {
        Self { api, repos }
    }
}

#[async_trait]
impl Fetcher for RepoListStrategy {
    async fn fetch_items(&self, filter: &FilterConfig, cancel: &CancellationToken) -> Result<Vec<PullRequest>> {
        let items = fan_out(&self.api, &self.repos, filter, cancel).await?;
        Ok(ExclusionFilter::new(filter).apply(items))
    }

    fn identity(&self) -> String {
        format!("repos:{}", self.repos.join(","))
    }
}

/// Pull requests of every repository in an organization
pub struct OrgStrategy {
    api: Arc<dyn ReviewApi>,
    org: String,
}

impl OrgStrategy {
    pub fn new(api: Arc<dyn ReviewApi>, org: impl Into<String>) -> Self {
        Self { api, org: org.into() }
    }
}

#[async_trait]
impl Fetcher for OrgStrategy {
    async fn fetch_items(&self, filter: &FilterConfig, cancel: &CancellationToken) -> Result<Vec<PullRequest>> {
        let api = &self.api;
        let org = self.org.as_str();
        let repos = collect_pages(usize::MAX, cancel, |page| async move { api.list_org_repos(org, page, cancel).await }).await?;
        tracing::debug!(org, repos = repos.len(), "Listing organization pull requests");

        let items = fan_out(&self.api, &repos, filter, cancel).await?;
        Ok(ExclusionFilter::new(filter).apply(items))
    }

    fn identity(&self) -> String {
        format!("org:{}", self.org)
    }
}

/// Search strategy shared by label and free-text sources
async fn search(
    api: &Arc<dyn ReviewApi>,
    qualifiers: &str,
    filter: &FilterConfig,
    cancel: &CancellationToken,
) -> Result<Vec<PullRequest>> {
    let query = build_search_query(qualifiers, filter);
    let items = collect_pages(filter.max_results, cancel, |page| {
        let query = query.as_str();
        async move { api.search_pulls(query, page, cancel).await }
    })
    .await?;
    Ok(ExclusionFilter::new(filter).apply(items))
}

/// Pull requests carrying a label, across the whole service
pub struct LabelSearchStrategy {
    api: Arc<dyn ReviewApi>,
    label: String,
}

impl LabelSearchStrategy {
    pub fn new(api: Arc<dyn ReviewApi>, label: impl Into<String>) -> Self {
        Self { api, label: label.into() }
    }

    fn qualifier(&self) -> String {
        if self.label.contains(' ') {
            format!("label:\"{}\"", self.label)
        } else {
            format!("label:{}", self.label)
        }
    }
}

#[async_trait]
impl Fetcher for LabelSearchStrategy {
    async fn fetch_items(&self, filter: &FilterConfig, cancel: &CancellationToken) -> Result<Vec<PullRequest>> {
        search(&self.api, &self.qualifier(), filter, cancel).await
    }

    fn identity(&self) -> String {
        format!("label:{}", self.label)
    }
}

/// Free-text search (also used for topic sources)
pub struct QueryStrategy {
    api: Arc<dyn ReviewApi>,
    query: String,
}

impl QueryStrategy {
    pub fn new(api: Arc<dyn ReviewApi>, query: impl Into<String>) -> Self {
        Self {
            api,
            query: query.into(),
        }
    }
}

#[async_trait]
impl Fetcher for QueryStrategy {
    async fn fetch_items(&self, filter: &FilterConfig, cancel: &CancellationToken) -> Result<Vec<PullRequest>> {
        search(&self.api, &self.query, filter, cancel).await
    }

    fn identity(&self) -> String {
        format!("query:{}", self.query)
    }
}
