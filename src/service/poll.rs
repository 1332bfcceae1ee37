//! Poll service: the application-root owner of the fetch layer.
//!
//! Owns one admission controller, one refresh scheduler, the persistent and
//! shared caches and the enhancer. Every registered source gets its own timer
//! task; a cache cleanup loop and an interval adjustment loop run alongside.
//! All of them hang off one cancellation token and stop together on
//! [`PollService::shutdown`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::ReviewApi;
use crate::cache::{CacheStats, SharedCache};
use crate::domain::{EnhancedItem, PullRequest, QuotaStatus};
use crate::enhance::Enhancer;
use crate::error::{PrwatchError, Result};
use crate::fetch::{AdmittedFetcher, CachedFetcher, ItemCache, build_fetcher};
use crate::limiter::{AdmissionController, ControllerStats, Priority, QuotaTracker};
use crate::scheduler::{RefreshScheduler, SourceSchedule};
use crate::service::config::{ServiceConfig, SourceConfig};
use crate::service::events::SourceEvent;

/// Quota figures for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaReport {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub last_update: Option<DateTime<Utc>>,
    /// Requests executing right now
    pub active_requests: usize,
}

impl QuotaReport {
    fn new(status: QuotaStatus, active_requests: usize) -> Self {
        Self {
            limit: status.limit,
            remaining: status.remaining,
            reset_at: status.reset_at,
            last_update: status.last_update,
            active_requests,
        }
    }
}

/// Fetch stack of one source
struct SourceRuntime {
    config: SourceConfig,
    cached: Arc<CachedFetcher>,
    admitted: AdmittedFetcher,
}

struct SourceHandle {
    runtime: Arc<SourceRuntime>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct ServiceInner {
    config: ServiceConfig,
    controller: Arc<AdmissionController>,
    scheduler: Arc<RefreshScheduler>,
    cache: Arc<ItemCache>,
    enhancer: Enhancer,
    events: mpsc::UnboundedSender<SourceEvent>,
}

impl ServiceInner {
    fn emit(&self, event: SourceEvent) {
        // No receiver left means nobody is watching; keep polling regardless.
        let _ = self.events.send(event);
    }

    /// One refresh of `source` at `priority`; the scheduler must already have
    /// marked it started
    async fn refresh(
        self: &Arc<Self>,
        source: &Arc<SourceRuntime>,
        priority: Priority,
        cancel: &CancellationToken,
    ) -> Result<Vec<PullRequest>> {
        let id = source.config.id.clone();
        self.emit(SourceEvent::RefreshStarted { source_id: id.clone() });
        tracing::debug!(source = %id, priority = ?priority, "Refreshing source");

        let result = source
            .admitted
            .fetch_with_priority(&source.config.filter, priority, cancel)
            .await;

        let items = match result {
            Ok(items) => items,
            Err(e) => {
                self.scheduler.mark_refresh_complete(&id, None);
                tracing::warn!(source = %id, error = %e, "Refresh failed");
                self.emit(SourceEvent::Failed {
                    source_id: id,
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let needs_detail = items.iter().filter(|i| !i.is_enhanced()).count();
        self.scheduler.mark_refresh_complete(&id, Some(needs_detail));
        tracing::info!(source = %id, items = items.len(), needs_detail, "Source updated");
        self.emit(SourceEvent::Updated {
            source_id: id.clone(),
            items: items.clone(),
        });

        if self.config.enrich && needs_detail > 0 && !cancel.is_cancelled() {
            let events = self.events.clone();
            let source_id = id.clone();
            self.enhancer
                .enhance_items(&id, &items, move |index, result| {
                    if let Ok(item) = result {
                        let _ = events.send(SourceEvent::Enhanced {
                            source_id: source_id.clone(),
                            index,
                            item,
                        });
                    }
                })
                .await;
        }

        Ok(items)
    }
}

/// Timer task of one source
async fn source_loop(inner: Arc<ServiceInner>, source: Arc<SourceRuntime>, cancel: CancellationToken) {
    let id = source.config.id.clone();
    let check = inner.config.check_interval;
    tracing::debug!(source = %id, "Source timer started");

    loop {
        let delay = inner.scheduler.time_until_due(&id).unwrap_or(check).max(check);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        if inner.scheduler.try_begin_refresh(&id) {
            // Errors were already reported as events.
            let _ = inner.refresh(&source, source.config.priority, &cancel).await;
        }
    }
    tracing::debug!(source = %id, "Source timer stopped");
}

/// Periodic sweep of expired cache entries
async fn cleanup_loop(cache: Arc<ItemCache>, shared: Arc<SharedCache<EnhancedItem>>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let cache = Arc::clone(&cache);
                let token = cancel.clone();
                match tokio::task::spawn_blocking(move || cache.clean_expired_entries(&token)).await {
                    Ok(Ok(removed)) => tracing::debug!(removed, "Cache cleanup pass"),
                    Ok(Err(PrwatchError::Cancelled)) => break,
                    Ok(Err(e)) => tracing::warn!(error = %e, "Cache cleanup failed"),
                    Err(e) => tracing::error!(error = ?e, "Cache cleanup task panicked"),
                }
                let purged = shared.purge_expired();
                if purged > 0 {
                    tracing::trace!(purged, "Shared cache purged");
                }
            }
        }
    }
}

/// Periodic re-scaling of refresh intervals to the quota
async fn adjust_loop(scheduler: Arc<RefreshScheduler>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                scheduler.adjust_refresh_intervals();
            }
        }
    }
}

/// Coordinated polling of many sources against one quota
pub struct PollService {
    inner: Arc<ServiceInner>,
    api: Arc<dyn ReviewApi>,
    shutdown: CancellationToken,
    sources: Mutex<HashMap<String, SourceHandle>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl PollService {
    /// Assemble the service and start its background loops.
    ///
    /// `quota` must be the tracker the API client reports headers to. Must be
    /// called inside a tokio runtime.
    pub fn new(
        api: Arc<dyn ReviewApi>,
        quota: Arc<QuotaTracker>,
        config: ServiceConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SourceEvent>)> {
        let cache = Arc::new(ItemCache::open(&config.cache_dir)?);
        let shared = Arc::new(SharedCache::new(config.shared_ttl));
        let controller = Arc::new(AdmissionController::new(config.controller.clone(), Arc::clone(&quota)));
        let scheduler = Arc::new(RefreshScheduler::new(config.scheduler.clone(), Arc::clone(&quota)));
        let enhancer = Enhancer::new(
            Arc::clone(&api),
            Arc::clone(&controller),
            Arc::clone(&shared),
            config.enhancer.clone(),
        );
        let (events, event_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let background = vec![
            tokio::spawn(cleanup_loop(
                Arc::clone(&cache),
                Arc::clone(&shared),
                config.cleanup_interval,
                shutdown.child_token(),
            )),
            tokio::spawn(adjust_loop(
                Arc::clone(&scheduler),
                config.adjust_interval,
                shutdown.child_token(),
            )),
        ];

        tracing::info!(cache_dir = %config.cache_dir.display(), "Poll service started");
        let inner = Arc::new(ServiceInner {
            config,
            controller,
            scheduler,
            cache,
            enhancer,
            events,
        });

        Ok((
            Self {
                inner,
                api,
                shutdown,
                sources: Mutex::new(HashMap::new()),
                background: Mutex::new(background),
            },
            event_rx,
        ))
    }

    fn sources(&self) -> MutexGuard<'_, HashMap<String, SourceHandle>> {
        self.sources.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn runtime(&self, source_id: &str) -> Result<Arc<SourceRuntime>> {
        self.sources()
            .get(source_id)
            .map(|h| Arc::clone(&h.runtime))
            .ok_or_else(|| PrwatchError::InvalidSource(format!("unknown source '{}'", source_id)))
    }

    /// Register a source and start its timer, replacing any source with the same id
    pub fn register_source(&self, config: SourceConfig) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(PrwatchError::Shutdown("poll service is shut down".to_string()));
        }
        self.unregister_source(&config.id);

        let cached = build_fetcher(
            &config.spec,
            Arc::clone(&self.api),
            Arc::clone(&self.inner.cache),
            self.inner.config.cache_ttl,
        );
        let admitted = AdmittedFetcher::new(
            cached.clone(),
            Arc::clone(&self.inner.controller),
            config.id.clone(),
            config.priority,
        )
        .with_timeout(self.inner.config.controller.default_timeout);

        self.inner
            .scheduler
            .add_source(&config.id, config.interval, config.priority);

        let id = config.id.clone();
        tracing::info!(source = %id, spec = %config.spec, "Source registered");
        let runtime = Arc::new(SourceRuntime {
            config,
            cached,
            admitted,
        });
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(source_loop(Arc::clone(&self.inner), Arc::clone(&runtime), cancel.clone()));
        self.sources().insert(id, SourceHandle { runtime, cancel, task });
        Ok(())
    }

    /// Stop a source's timer and forget its schedule
    pub fn unregister_source(&self, source_id: &str) -> bool {
        let Some(handle) = self.sources().remove(source_id) else {
            return false;
        };
        handle.cancel.cancel();
        self.inner.scheduler.remove_source(source_id);
        tracing::info!(source = %source_id, "Source unregistered");
        true
    }

    /// Refresh a source immediately.
    ///
    /// Drops its cached result and submits at `High` priority: the scheduler
    /// gate is bypassed, admission control is not.
    pub async fn refresh_now(&self, source_id: &str) -> Result<Vec<PullRequest>> {
        let runtime = self.runtime(source_id)?;
        runtime.cached.invalidate_cache(&runtime.config.filter);
        let cancel = self.shutdown.child_token();
        self.inner.scheduler.mark_refresh_started(source_id);
        self.inner.refresh(&runtime, Priority::High, &cancel).await
    }

    /// Ids of registered sources, sorted
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn schedule(&self, source_id: &str) -> Option<SourceSchedule> {
        self.inner.scheduler.schedule(source_id)
    }

    pub fn quota_status(&self) -> QuotaReport {
        QuotaReport::new(self.inner.controller.quota().status(), self.inner.controller.active_count())
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        self.inner.cache.stats()
    }

    pub fn controller_stats(&self) -> ControllerStats {
        self.inner.controller.stats()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop every timer and loop, then the enhancer and the controller.
    ///
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        tracing::info!("Poll service shutting down");
        self.shutdown.cancel();

        let handles: Vec<SourceHandle> = self.sources().drain().map(|(_, h)| h).collect();
        let background: Vec<JoinHandle<()>> = std::mem::take(&mut *self.background.lock().unwrap_or_else(|e| e.into_inner()));
        for task in handles.into_iter().map(|h| h.task).chain(background) {
            if let Err(e) = task.await {
                tracing::error!(error = ?e, "Service task panicked");
            }
        }

        self.inner.enhancer.stop().await;
        self.inner.controller.shutdown().await;
        tracing::info!("Poll service stopped");
    }
}

impl Drop for PollService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockReviewApi;
    use crate::domain::EnhancedItem;
    use crate::scheduler::SchedulerConfig;
    use tempfile::TempDir;

    fn fast_config(dir: &TempDir) -> ServiceConfig {
        let mut config = ServiceConfig::new(dir.path().join("cache"));
        config.controller = config.controller.with_tick(Duration::from_millis(5));
        config.scheduler = SchedulerConfig::default()
            .with_stagger_window(Duration::ZERO)
            .with_min_interval(Duration::ZERO);
        config.check_interval = Duration::from_millis(10);
        config
    }

    fn api() -> Arc<MockReviewApi> {
        Arc::new(
            MockReviewApi::new()
                .with_repo(
                    "o/r",
                    vec![
                        PullRequest::new("o/r", 1, "First", "alice"),
                        PullRequest::new("o/r", 2, "Second", "bob"),
                    ],
                )
                .with_detail("o/r#1", EnhancedItem {
                    comments: 5,
                    ..Default::default()
                }),
        )
    }

    async fn next_matching<F>(rx: &mut mpsc::UnboundedReceiver<SourceEvent>, pred: F) -> SourceEvent
    where
        F: Fn(&SourceEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.expect("event channel closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn test_registered_source_refreshes_and_enriches() {
        let dir = TempDir::new().unwrap();
        let api = api();
        let (service, mut rx) =
            PollService::new(api.clone(), Arc::new(QuotaTracker::default()), fast_config(&dir)).unwrap();

        service
            .register_source(SourceConfig::parse("team", "repos:o/r", Duration::from_secs(300)).unwrap())
            .unwrap();

        let updated = next_matching(&mut rx, |e| matches!(e, SourceEvent::Updated { .. })).await;
        let SourceEvent::Updated { items, .. } = updated else {
            unreachable!()
        };
        assert_eq!(items.len(), 2);

        let enhanced = next_matching(&mut rx, |e| matches!(e, SourceEvent::Enhanced { item, .. } if item.number == 1)).await;
        let SourceEvent::Enhanced { item, .. } = enhanced else {
            unreachable!()
        };
        assert_eq!(item.enhanced.unwrap().comments, 5);

        service.shutdown().await;
        assert!(service.is_shut_down());
    }

    #[tokio::test]
    async fn test_refresh_now_bypasses_cache() {
        let dir = TempDir::new().unwrap();
        let api = api();
        let mut config = fast_config(&dir);
        config.enrich = false;
        config.check_interval = Duration::from_secs(60);
        let (service, _rx) = PollService::new(api.clone(), Arc::new(QuotaTracker::default()), config).unwrap();
        service
            .register_source(SourceConfig::parse("team", "repos:o/r", Duration::from_secs(300)).unwrap())
            .unwrap();

        let first = service.refresh_now("team").await.unwrap();
        api.set_repo("o/r", vec![PullRequest::new("o/r", 3, "Third", "carol")]);
        let second = service.refresh_now("team").await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        assert!(service.controller_stats().succeeded >= 2);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_refresh_emits_event() {
        let dir = TempDir::new().unwrap();
        let api = api();
        api.fail_repo("o/r");
        let (service, mut rx) =
            PollService::new(api.clone(), Arc::new(QuotaTracker::default()), fast_config(&dir)).unwrap();
        service
            .register_source(SourceConfig::parse("team", "repos:o/r", Duration::from_secs(300)).unwrap())
            .unwrap();

        let failed = next_matching(&mut rx, |e| matches!(e, SourceEvent::Failed { .. })).await;
        assert_eq!(failed.source_id(), "team");
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_source_and_unregister() {
        let dir = TempDir::new().unwrap();
        let (service, _rx) = PollService::new(api(), Arc::new(QuotaTracker::default()), fast_config(&dir)).unwrap();
        assert!(matches!(
            service.refresh_now("nope").await,
            Err(PrwatchError::InvalidSource(_))
        ));

        service
            .register_source(SourceConfig::parse("team", "repos:o/r", Duration::from_secs(300)).unwrap())
            .unwrap();
        assert_eq!(service.source_ids(), vec!["team".to_string()]);
        assert!(service.schedule("team").is_some());
        assert!(service.unregister_source("team"));
        assert!(service.schedule("team").is_none());
        assert!(!service.unregister_source("team"));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_register_after_shutdown_rejected() {
        let dir = TempDir::new().unwrap();
        let (service, _rx) = PollService::new(api(), Arc::new(QuotaTracker::default()), fast_config(&dir)).unwrap();
        service.shutdown().await;
        service.shutdown().await;
        let result = service.register_source(SourceConfig::parse("team", "repos:o/r", Duration::from_secs(60)).unwrap());
        assert!(matches!(result, Err(PrwatchError::Shutdown(_))));
    }

    #[tokio::test]
    async fn test_quota_report() {
        let dir = TempDir::new().unwrap();
        let (service, _rx) = PollService::new(api(), Arc::new(QuotaTracker::new(5000)), fast_config(&dir)).unwrap();
        let report = service.quota_status();
        assert_eq!(report.limit, 5000);
        assert_eq!(report.active_requests, 0);
        assert_eq!(service.cache_stats().unwrap().entry_count, 0);
        service.shutdown().await;
    }
}
