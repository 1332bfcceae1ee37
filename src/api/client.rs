//! Remote API contract consumed by the fetch layer

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::domain::{EnhancedItem, FilterConfig, PullRequest};
use crate::error::Result;

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Whether the server reported a further page
    pub has_next: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, has_next: bool) -> Self {
        Self { items, has_next }
    }

    /// A final page
    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, false)
    }
}

/// One error entry of a GraphQL response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    pub message: String,
}

/// `{data, errors, extensions.cost}` of a GraphQL response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphqlResponse {
    pub data: Option<Value>,
    pub errors: Vec<GraphqlError>,
    /// Requests charged for the query, when reported
    pub cost: Option<u32>,
}

impl GraphqlResponse {
    /// Parse a raw response body
    pub fn from_value(mut body: Value) -> Self {
        let errors = body
            .get_mut("errors")
            .map(Value::take)
            .and_then(|e| serde_json::from_value::<Vec<GraphqlError>>(e).ok())
            .unwrap_or_default();
        let cost = body
            .pointer("/extensions/cost/requestCount")
            .and_then(Value::as_u64)
            .map(|c| c as u32);
        let data = body.get_mut("data").map(Value::take).filter(|d| !d.is_null());
        Self { data, errors, cost }
    }

    pub fn is_ok(&self) -> bool {
        self.data.is_some() && self.errors.is_empty()
    }
}

/// Calls the fetch layer makes against the code-review service.
///
/// Every call takes a cancellation token; implementations must abort the
/// underlying network call when it fires.
#[async_trait]
pub trait ReviewApi: Send + Sync {
    /// REST list of one repository's pull requests (1-based `page`)
    async fn list_pulls(
        &self,
        repo: &str,
        filter: &FilterConfig,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Page<PullRequest>>;

    /// REST search over pull requests; `query` holds the qualifiers
    async fn search_pulls(&self, query: &str, page: u32, cancel: &CancellationToken) -> Result<Page<PullRequest>>;

    /// Repository names (`owner/name`) of an organization
    async fn list_org_repos(&self, org: &str, page: u32, cancel: &CancellationToken) -> Result<Page<String>>;

    /// Single GraphQL request
    async fn graphql(&self, query: &str, variables: Value, cancel: &CancellationToken) -> Result<GraphqlResponse>;

    /// Per-item detail missing from list responses
    async fn pull_detail(&self, pr: &PullRequest, cancel: &CancellationToken) -> Result<EnhancedItem>;
}
