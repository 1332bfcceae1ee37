//! Fetch layer integration tests
//!
//! Drives the composed fetch stack, admission controller, scheduler and poll
//! service end to end against the in-memory review API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use prwatch::api::MockReviewApi;
use prwatch::cache::SharedCache;
use prwatch::domain::{EnhancedItem, FilterConfig, PullRequest, SourceSpec};
use prwatch::enhance::{Enhancer, EnhancerConfig};
use prwatch::error::{PrwatchError, Result};
use prwatch::fetch::{AdmittedFetcher, Fetcher, ItemCache, build_fetcher};
use prwatch::limiter::{AdmissionController, ControllerConfig, FetchRequest, Priority, QuotaTracker};
use prwatch::scheduler::{RefreshScheduler, SchedulerConfig};
use prwatch::service::{PollService, ServiceConfig, SourceConfig, SourceEvent};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn pulls(repo: &str, n: u64) -> Vec<PullRequest> {
    (1..=n)
        .map(|i| PullRequest::new(repo, i, format!("Change {}", i), "dev"))
        .collect()
}

fn fast_controller(max_concurrent: usize, quota: Arc<QuotaTracker>) -> Arc<AdmissionController> {
    let config = ControllerConfig::default()
        .with_max_concurrent(max_concurrent)
        .with_tick(Duration::from_millis(5));
    Arc::new(AdmissionController::new(config, quota))
}

/// Org source falls back from GraphQL, fans out, filters bots and is cached on disk
#[tokio::test]
async fn test_composed_org_fetch_is_cached_across_reopen() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let mut acme_api = pulls("acme/api", 3);
    acme_api.push(PullRequest::new("acme/api", 9, "Bump deps", "dependabot[bot]"));
    let api = Arc::new(
        MockReviewApi::new()
            .with_org("acme", &["acme/api", "acme/web"])
            .with_repo("acme/api", acme_api)
            .with_repo("acme/web", pulls("acme/web", 2)),
    );
    let spec = SourceSpec::parse("org:acme")?;
    let filter = FilterConfig::default();
    let cancel = CancellationToken::new();

    {
        let cache = Arc::new(ItemCache::open(temp_dir.path())?);
        let fetcher = build_fetcher(&spec, api.clone(), cache, Duration::from_secs(300));
        let items = fetcher.fetch_items(&filter, &cancel).await?;
        assert_eq!(items.len(), 5);
        assert!(items.iter().all(|i| !i.author.ends_with("[bot]")));
        assert_eq!(api.graphql_calls(), 1);
    }

    let calls = api.total_calls();
    {
        let cache = Arc::new(ItemCache::open(temp_dir.path())?);
        let fetcher = build_fetcher(&spec, api.clone(), cache, Duration::from_secs(300));
        let items = fetcher.fetch_items(&filter, &cancel).await?;
        assert_eq!(items.len(), 5);
    }
    assert_eq!(api.total_calls(), calls, "second fetch must be served from disk");

    Ok(())
}

/// One failing repository is absorbed; all failing is an aggregate error
#[tokio::test]
async fn test_fan_out_partial_and_total_failure() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let api = Arc::new(
        MockReviewApi::new()
            .with_repo("o/a", pulls("o/a", 2))
            .with_repo("o/b", pulls("o/b", 2)),
    );
    api.fail_repo("o/b");
    let cache = Arc::new(ItemCache::open(temp_dir.path())?);
    let spec = SourceSpec::parse("repos:o/a,o/b")?;
    let cancel = CancellationToken::new();

    let fetcher = build_fetcher(&spec, api.clone(), Arc::clone(&cache), Duration::from_secs(300));
    let items = fetcher.fetch_items(&FilterConfig::default(), &cancel).await?;
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.repo == "o/a"));

    api.fail_repo("o/a");
    let filter = FilterConfig::default().with_drafts(false);
    let result = fetcher.fetch_items(&filter, &cancel).await;
    assert!(matches!(result, Err(PrwatchError::PartialFailure { failed: 2, total: 2, .. })));

    Ok(())
}

/// Many concurrent admitted fetches never exceed the concurrency cap
#[tokio::test]
async fn test_admission_cap_holds_under_load() {
    let quota = Arc::new(QuotaTracker::new(5000));
    let controller = fast_controller(3, Arc::clone(&quota));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..20 {
        let controller = Arc::clone(&controller);
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        let priority = if i % 4 == 0 { Priority::High } else { Priority::Normal };
        handles.push(tokio::spawn(async move {
            let request = FetchRequest::new(format!("source-{}", i % 5), priority).with_timeout(Duration::from_secs(5));
            controller
                .submit(request, move |_cancel| async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(15)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                })
                .await
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(controller.stats().succeeded, 20);
    assert_eq!(quota.remaining(), 5000 - 20);
    controller.shutdown().await;
}

/// A slow admitted fetch times out and its API call observes cancellation
#[tokio::test]
async fn test_admitted_fetch_timeout() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let api = Arc::new(
        MockReviewApi::new()
            .with_delay(Duration::from_secs(5))
            .with_repo("o/r", pulls("o/r", 1)),
    );
    let controller = fast_controller(2, Arc::new(QuotaTracker::default()));
    let cached = build_fetcher(
        &SourceSpec::parse("repos:o/r")?,
        api.clone(),
        Arc::new(ItemCache::open(temp_dir.path())?),
        Duration::from_secs(300),
    );
    let fetcher = AdmittedFetcher::new(cached, Arc::clone(&controller), "slow", Priority::Normal)
        .with_timeout(Duration::from_millis(50));

    let started = std::time::Instant::now();
    let result = fetcher.fetch_items(&FilterConfig::default(), &CancellationToken::new()).await;
    assert!(matches!(result, Err(PrwatchError::Timeout(_))));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(controller.stats().timed_out, 1);

    controller.shutdown().await;
    Ok(())
}

/// Overlapping sources share item detail instead of fetching it twice
#[tokio::test]
async fn test_enhancement_shared_between_sources() {
    let api = Arc::new(MockReviewApi::new().with_detail(
        "o/r#1",
        EnhancedItem {
            comments: 7,
            ..Default::default()
        },
    ));
    let controller = fast_controller(4, Arc::new(QuotaTracker::default()));
    let enhancer = Enhancer::new(
        api.clone(),
        Arc::clone(&controller),
        Arc::new(SharedCache::new(Duration::from_secs(60))),
        EnhancerConfig::default(),
    );

    let items = pulls("o/r", 3);
    let first = enhancer.enhance_all("team", items.clone()).await;
    let second = enhancer.enhance_all("org", items).await;

    assert!(first.iter().chain(second.iter()).all(PullRequest::is_enhanced));
    assert_eq!(first[0].enhanced.as_ref().map(|d| d.comments), Some(7));
    assert_eq!(api.detail_calls(), 3);

    enhancer.stop().await;
    controller.shutdown().await;
}

/// With a cap of two simultaneous refreshes the third source waits its turn
#[tokio::test]
async fn test_scheduler_limits_simultaneous_refreshes() {
    let config = SchedulerConfig::default()
        .with_max_simultaneous(2)
        .with_min_interval(Duration::ZERO)
        .with_stagger_window(Duration::ZERO);
    let scheduler = RefreshScheduler::new(config, Arc::new(QuotaTracker::new(5000)));
    scheduler.add_source("low", Duration::from_secs(60), Priority::Low);
    scheduler.add_source("normal", Duration::from_secs(60), Priority::Normal);
    scheduler.add_source("urgent", Duration::from_secs(60), Priority::Urgent);

    let order = scheduler.optimal_refresh_order();
    assert_eq!(order.first().map(String::as_str), Some("urgent"));

    let mut started = Vec::new();
    for id in &order {
        if scheduler.should_refresh(id) {
            assert!(scheduler.mark_refresh_started(id));
            started.push(id.clone());
        }
    }
    assert_eq!(started.len(), 2);
    assert_eq!(scheduler.refreshing_count(), 2);

    let waiting = order.iter().find(|id| !started.contains(id)).cloned().unwrap();
    scheduler.mark_refresh_complete(&started[0], Some(4));
    assert!(scheduler.should_refresh(&waiting));
}

/// The service reports a refresh as started, then updated, then enriched
#[tokio::test]
async fn test_service_event_sequence() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let api = Arc::new(
        MockReviewApi::new()
            .with_search("label:bug", pulls("o/r", 2))
            .with_detail(
                "o/r#2",
                EnhancedItem {
                    additions: 12,
                    ..Default::default()
                },
            ),
    );
    let mut config = ServiceConfig::new(temp_dir.path().join("cache"));
    config.controller = config.controller.with_tick(Duration::from_millis(5));
    config.scheduler = SchedulerConfig::default()
        .with_min_interval(Duration::ZERO)
        .with_stagger_window(Duration::ZERO);
    config.check_interval = Duration::from_millis(10);
    let quota = config.build_quota();

    let (service, mut events) = PollService::new(api.clone(), quota, config)?;
    service.register_source(SourceConfig::parse("bugs", "label:bug", Duration::from_secs(600))?.with_priority(Priority::High))?;

    let mut seen = Vec::new();
    let mut enriched = 0;
    tokio::time::timeout(Duration::from_secs(5), async {
        while enriched < 2 {
            match events.recv().await {
                Some(SourceEvent::RefreshStarted { .. }) => seen.push("started"),
                Some(SourceEvent::Updated { items, .. }) => {
                    assert_eq!(items.len(), 2);
                    seen.push("updated");
                }
                Some(SourceEvent::Enhanced { item, .. }) => {
                    if item.number == 2 {
                        assert_eq!(item.enhanced.as_ref().map(|d| d.additions), Some(12));
                    }
                    enriched += 1;
                }
                Some(SourceEvent::Failed { error, .. }) => panic!("refresh failed: {}", error),
                None => break,
            }
        }
    })
    .await
    .expect("timed out waiting for events");

    assert_eq!(seen, vec!["started", "updated"]);
    assert_eq!(api.search_calls(), 1);
    let schedule = service.schedule("bugs").unwrap();
    assert!(schedule.last_refresh.is_some());
    assert!(!schedule.refreshing);

    service.shutdown().await;
    Ok(())
}
