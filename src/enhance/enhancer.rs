//! Per-item enrichment.
//!
//! Items that arrive without detail are enriched through the worker pool,
//! each detail call admitted at `Low` priority so enrichment never starves
//! list refreshes. Results stream back per item as they complete. The shared
//! cache lets overlapping sources reuse each other's detail.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::ReviewApi;
use crate::cache::SharedCache;
use crate::domain::{EnhancedItem, PullRequest};
use crate::error::{PrwatchError, Result};
use crate::limiter::{AdmissionController, FetchRequest, Priority};
use crate::pool::{BatchResult, DEFAULT_JOB_TIMEOUT, PoolConfig, WorkerPool};

/// Extra time the pool allows beyond the admission timeout, so the controller
/// times out (and cancels the call) first.
const POOL_TIMEOUT_MARGIN: Duration = Duration::from_secs(1);

/// Default number of enrichment workers
pub const DEFAULT_ENHANCE_WORKERS: usize = 5;

/// Enrichment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancerConfig {
    pub workers: usize,
    /// Admission plus execution budget of one detail call
    pub job_timeout: Duration,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_ENHANCE_WORKERS,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }
}

/// One item waiting for detail
#[derive(Debug, Clone)]
pub struct EnhancementJob {
    pub source_id: String,
    pub item: PullRequest,
}

/// Shared-cache key: the item plus its last update, so edited items re-enrich
pub fn detail_key(pr: &PullRequest) -> String {
    match pr.updated_at {
        Some(updated) => format!("{}@{}", pr.item_key(), updated.timestamp()),
        None => pr.item_key(),
    }
}

pub struct Enhancer {
    pool: WorkerPool<EnhancementJob, PullRequest>,
    shared: Arc<SharedCache<EnhancedItem>>,
}

impl Enhancer {
    /// Create and start an enhancer
    pub fn new(
        api: Arc<dyn ReviewApi>,
        controller: Arc<AdmissionController>,
        shared: Arc<SharedCache<EnhancedItem>>,
        config: EnhancerConfig,
    ) -> Self {
        let job_timeout = config.job_timeout;
        let work = move |job: EnhancementJob| {
            let api = Arc::clone(&api);
            let controller = Arc::clone(&controller);
            async move {
                let EnhancementJob { source_id, mut item } = job;
                let request = FetchRequest::new(source_id, Priority::Low).with_timeout(job_timeout);
                let target = item.clone();
                let detail = controller
                    .submit(request, move |token| async move { api.pull_detail(&target, &token).await })
                    .await?;
                item.enhanced = Some(detail);
                Ok::<_, PrwatchError>(item)
            }
        };

        let pool = WorkerPool::with_config(
            PoolConfig {
                workers: config.workers,
                job_timeout: job_timeout + POOL_TIMEOUT_MARGIN,
            },
            work,
        );
        pool.start();

        Self { pool, shared }
    }

    pub fn shared_cache(&self) -> Arc<SharedCache<EnhancedItem>> {
        Arc::clone(&self.shared)
    }

    pub fn is_running(&self) -> bool {
        self.pool.is_running()
    }

    /// Enrich the items of `source_id` that lack detail, streaming each result.
    ///
    /// `on_item(index, result)` is called once per item that needed detail,
    /// with `index` into `items`; already-enriched items are skipped. Calls
    /// may overlap. Returns the number of items successfully enriched.
    pub async fn enhance_items<F>(&self, source_id: &str, items: &[PullRequest], on_item: F) -> usize
    where
        F: Fn(usize, Result<PullRequest>) + Send + Sync + 'static,
    {
        let on_item = Arc::new(on_item);
        let mut enriched = 0;
        let mut positions = Vec::new();
        let mut jobs = Vec::new();

        for (index, item) in items.iter().enumerate() {
            if item.is_enhanced() {
                continue;
            }
            if let Some(detail) = self.shared.get(&detail_key(item), source_id) {
                let mut item = item.clone();
                item.enhanced = Some(detail);
                on_item(index, Ok(item));
                enriched += 1;
                continue;
            }
            positions.push(index);
            jobs.push(EnhancementJob {
                source_id: source_id.to_string(),
                item: item.clone(),
            });
        }

        if jobs.is_empty() {
            return enriched;
        }
        tracing::debug!(source = %source_id, jobs = jobs.len(), shared_hits = enriched, "Enriching items");

        let successes = Arc::new(AtomicUsize::new(0));
        let callback = {
            let shared = Arc::clone(&self.shared);
            let consumer = source_id.to_string();
            let successes = Arc::clone(&successes);
            move |batch_index: usize, result: BatchResult<PullRequest>| {
                let index = positions[batch_index];
                let result = result.into_result();
                if let Ok(item) = &result
                    && let Some(detail) = &item.enhanced
                {
                    shared.insert(&detail_key(item), detail.clone(), &consumer);
                    successes.fetch_add(1, Ordering::SeqCst);
                }
                if let Err(e) = &result {
                    tracing::debug!(source = %consumer, index, error = %e, "Enrichment failed");
                }
                on_item(index, result);
            }
        };
        self.pool.process_batch_with_callback(jobs, callback).await;

        enriched + successes.load(Ordering::SeqCst)
    }

    /// Enrich and return all items in their original order.
    ///
    /// Items whose enrichment failed are returned without detail.
    pub async fn enhance_all(&self, source_id: &str, items: Vec<PullRequest>) -> Vec<PullRequest> {
        let slots = Arc::new(Mutex::new(items.clone()));
        let sink = Arc::clone(&slots);
        self.enhance_items(source_id, &items, move |index, result| {
            if let Ok(item) = result {
                let mut slots = sink.lock().unwrap_or_else(|e| e.into_inner());
                slots[index] = item;
            }
        })
        .await;
        let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *slots)
    }

    /// Stop the pool; in-flight detail calls finish, queued ones are dropped
    pub async fn stop(&self) {
        self.pool.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockReviewApi;
    use crate::domain::ReviewStatus;
    use crate::limiter::{ControllerConfig, QuotaTracker};

    fn controller() -> Arc<AdmissionController> {
        Arc::new(AdmissionController::new(
            ControllerConfig::default().with_tick(Duration::from_millis(5)),
            Arc::new(QuotaTracker::default()),
        ))
    }

    fn items(n: u64) -> Vec<PullRequest> {
        (1..=n).map(|i| PullRequest::new("o/r", i, format!("PR {}", i), "dev")).collect()
    }

    fn approved() -> EnhancedItem {
        EnhancedItem {
            review_status: ReviewStatus::Approved,
            comments: 2,
            ..Default::default()
        }
    }

    fn enhancer(api: Arc<MockReviewApi>, shared: Arc<SharedCache<EnhancedItem>>) -> Enhancer {
        Enhancer::new(api, controller(), shared, EnhancerConfig::default())
    }

    #[tokio::test]
    async fn test_streams_every_item() {
        let api = Arc::new(MockReviewApi::new().with_detail("o/r#2", approved()));
        let enhancer = enhancer(api.clone(), Arc::new(SharedCache::default()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let enriched = enhancer
            .enhance_items("team", &items(3), move |index, result| {
                sink.lock().unwrap().push((index, result.unwrap()));
            })
            .await;

        assert_eq!(enriched, 3);
        let mut seen = seen.lock().unwrap().clone();
        seen.sort_by_key(|(i, _)| *i);
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[1].1.enhanced.as_ref().unwrap().review_status, ReviewStatus::Approved);
        assert_eq!(api.detail_calls(), 3);
    }

    #[tokio::test]
    async fn test_already_enriched_items_skipped() {
        let api = Arc::new(MockReviewApi::new());
        let enhancer = enhancer(api.clone(), Arc::new(SharedCache::default()));
        let mut list = items(2);
        list[0].enhanced = Some(approved());

        let enriched = enhancer.enhance_items("team", &list, |_, _| {}).await;
        assert_eq!(enriched, 1);
        assert_eq!(api.detail_calls(), 1);
    }

    #[tokio::test]
    async fn test_shared_cache_dedups_across_sources() {
        let api = Arc::new(MockReviewApi::new());
        let shared = Arc::new(SharedCache::default());
        let enhancer = enhancer(api.clone(), Arc::clone(&shared));
        let list = items(2);

        enhancer.enhance_items("org", &list, |_, _| {}).await;
        enhancer.enhance_items("team", &list, |_, _| {}).await;

        assert_eq!(api.detail_calls(), 2);
        assert_eq!(shared.consumers(&detail_key(&list[0])), vec!["org".to_string(), "team".to_string()]);
    }

    #[tokio::test]
    async fn test_failures_reported_not_fatal() {
        let api = Arc::new(MockReviewApi::new());
        api.set_fail_details(true);
        let enhancer = enhancer(api, Arc::new(SharedCache::default()));
        let errors = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&errors);

        let enriched = enhancer
            .enhance_items("team", &items(2), move |_, result| {
                if let Err(PrwatchError::Transport(_)) = result {
                    *sink.lock().unwrap() += 1;
                }
            })
            .await;
        assert_eq!(enriched, 0);
        assert_eq!(*errors.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_enhance_all_keeps_order() {
        let api = Arc::new(MockReviewApi::new().with_delay(Duration::from_millis(5)));
        let enhancer = enhancer(api, Arc::new(SharedCache::default()));
        let result = enhancer.enhance_all("team", items(6)).await;
        let numbers: Vec<u64> = result.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
        assert!(result.iter().all(PullRequest::is_enhanced));
    }

    #[test]
    fn test_detail_key_includes_update_time() {
        let mut pr = PullRequest::new("o/r", 1, "PR", "dev");
        assert_eq!(detail_key(&pr), "o/r#1");
        pr.updated_at = chrono::DateTime::from_timestamp(1_700_000_000, 0);
        assert_eq!(detail_key(&pr), "o/r#1@1700000000");
    }
}
