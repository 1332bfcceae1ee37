//! Fetcher that runs every fetch through the admission controller

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{FilterConfig, PullRequest};
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::limiter::{AdmissionController, DEFAULT_REQUEST_TIMEOUT, FetchRequest, Priority};

pub struct AdmittedFetcher {
    inner: Arc<dyn Fetcher>,
    controller: Arc<AdmissionController>,
    source_id: String,
    priority: Priority,
    timeout: Duration,
}

impl AdmittedFetcher {
    pub fn new(
        inner: Arc<dyn Fetcher>,
        controller: Arc<AdmissionController>,
        source_id: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            inner,
            controller,
            source_id: source_id.into(),
            priority,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Fetch at an explicit priority (manual refreshes jump the normal queue)
    pub async fn fetch_with_priority(
        &self,
        filter: &FilterConfig,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> Result<Vec<PullRequest>> {
        let request = FetchRequest::new(self.source_id.clone(), priority)
            .with_timeout(self.timeout)
            .with_parent_cancel(cancel);
        let inner = Arc::clone(&self.inner);
        let filter = filter.clone();

        self.controller
            .submit(request, move |token| async move { inner.fetch_items(&filter, &token).await })
            .await
    }
}

#[async_trait]
impl Fetcher for AdmittedFetcher {
    async fn fetch_items(&self, filter: &FilterConfig, cancel: &CancellationToken) -> Result<Vec<PullRequest>> {
        self.fetch_with_priority(filter, self.priority, cancel).await
    }

    fn identity(&self) -> String {
        self.inner.identity()
    }
}
