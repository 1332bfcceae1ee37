//! Consolidated GraphQL query with transparent fallback.
//!
//! One search query returns the coarse fields plus review decision, check
//! rollup, merge state and diff stats for every item, so items served this way
//! arrive already enriched. Any failure of that path (transport, auth, schema,
//! GraphQL errors) falls through to the wrapped base strategy; callers cannot
//! tell which path produced the data.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::api::ReviewApi;
use crate::domain::{CheckStatus, EnhancedItem, FilterConfig, MergeState, PullRequest, ReviewStatus};
use crate::error::{PrwatchError, Result};
use crate::fetch::Fetcher;
use crate::fetch::exclusion::ExclusionFilter;
use crate::fetch::strategy::{MAX_PAGES, build_search_query};

/// Largest page the search connection accepts
const GRAPHQL_PAGE_SIZE: usize = 100;

const SEARCH_QUERY: &str = r#"
query($q: String!, $first: Int!, $after: String) {
  search(query: $q, type: ISSUE, first: $first, after: $after) {
    pageInfo { hasNextPage endCursor }
    nodes {
      ... on PullRequest {
        number
        title
        url
        state
        isDraft
        createdAt
        updatedAt
        headRefOid
        additions
        deletions
        changedFiles
        reviewDecision
        mergeStateStatus
        author { login }
        repository { nameWithOwner }
        labels(first: 20) { nodes { name } }
        comments { totalCount }
        reviewThreads { totalCount }
        commits(last: 1) { nodes { commit { statusCheckRollup { state } } } }
      }
    }
  }
}
"#;

/// Optimized path in front of a base strategy
pub struct OptimizedFetcher {
    api: Arc<dyn ReviewApi>,
    base: Arc<dyn Fetcher>,
    qualifiers: String,
}

impl OptimizedFetcher {
    /// `qualifiers` select the same items the base strategy would list
    pub fn new(api: Arc<dyn ReviewApi>, base: Arc<dyn Fetcher>, qualifiers: impl Into<String>) -> Self {
        Self {
            api,
            base,
            qualifiers: qualifiers.into(),
        }
    }

    async fn fetch_optimized(&self, filter: &FilterConfig, cancel: &CancellationToken) -> Result<Vec<PullRequest>> {
        let query = build_search_query(&self.qualifiers, filter);
        let mut items = Vec::new();
        let mut after: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let first = filter.max_results.saturating_sub(items.len()).clamp(1, GRAPHQL_PAGE_SIZE);
            let variables = json!({ "q": query, "first": first, "after": after });
            let response = self.api.graphql(SEARCH_QUERY, variables, cancel).await?;

            if let Some(error) = response.errors.first() {
                return Err(PrwatchError::Degraded(error.message.clone()));
            }
            let data = response
                .data
                .ok_or_else(|| PrwatchError::Degraded("response carried no data".to_string()))?;
            let search = data
                .get("search")
                .ok_or_else(|| PrwatchError::Degraded("response missing search".to_string()))?;

            let nodes = search["nodes"].as_array().map(Vec::as_slice).unwrap_or_default();
            let empty = nodes.is_empty();
            items.extend(nodes.iter().filter_map(pull_from_node));

            let has_next = search.pointer("/pageInfo/hasNextPage").and_then(Value::as_bool).unwrap_or(false);
            after = search
                .pointer("/pageInfo/endCursor")
                .and_then(Value::as_str)
                .map(str::to_string);
            if !has_next || empty || after.is_none() || items.len() >= filter.max_results {
                break;
            }
        }

        items.truncate(filter.max_results);
        Ok(ExclusionFilter::new(filter).apply(items))
    }
}

#[async_trait]
impl Fetcher for OptimizedFetcher {
    async fn fetch_items(&self, filter: &FilterConfig, cancel: &CancellationToken) -> Result<Vec<PullRequest>> {
        match self.fetch_optimized(filter, cancel).await {
            Ok(items) => {
                tracing::debug!(source = %self.base.identity(), items = items.len(), "Served by optimized query");
                Ok(items)
            }
            Err(PrwatchError::Cancelled) => Err(PrwatchError::Cancelled),
            Err(e) => {
                tracing::debug!(source = %self.base.identity(), error = %e, "Optimized query failed, using base strategy");
                self.base.fetch_items(filter, cancel).await
            }
        }
    }

    fn identity(&self) -> String {
        self.base.identity()
    }
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

fn count(value: &Value, pointer: &str) -> u64 {
    value.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

/// Build an enriched pull request from one search node
fn pull_from_node(node: &Value) -> Option<PullRequest> {
    let number = node["number"].as_u64()?;
    let repo = node.pointer("/repository/nameWithOwner").and_then(Value::as_str)?;
    let author = node.pointer("/author/login").and_then(Value::as_str).unwrap_or("ghost");

    let mut pr = PullRequest::new(repo, number, node["title"].as_str().unwrap_or_default(), author);
    if let Some(url) = node["url"].as_str() {
        pr.url = url.to_string();
    }
    if let Some(state) = node["state"].as_str() {
        pr.state = state.to_lowercase();
    }
    pr.draft = node["isDraft"].as_bool().unwrap_or(false);
    pr.labels = node
        .pointer("/labels/nodes")
        .and_then(Value::as_array)
        .map(|ls| ls.iter().filter_map(|l| l["name"].as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    pr.head_sha = node["headRefOid"].as_str().map(str::to_string);
    pr.created_at = parse_time(&node["createdAt"]);
    pr.updated_at = parse_time(&node["updatedAt"]);

    let rollup = node
        .pointer("/commits/nodes/0/commit/statusCheckRollup/state")
        .and_then(Value::as_str);
    pr.enhanced = Some(EnhancedItem {
        comments: count(node, "/comments/totalCount"),
        review_comments: count(node, "/reviewThreads/totalCount"),
        review_status: ReviewStatus::from_review_decision(node["reviewDecision"].as_str()),
        check_status: CheckStatus::from_rollup_state(rollup),
        merge_state: MergeState::parse(node["mergeStateStatus"].as_str()),
        additions: count(node, "/additions"),
        deletions: count(node, "/deletions"),
        changed_files: count(node, "/changedFiles"),
        enhanced_at: Utc::now(),
    });
    Some(pr)
}
