//! Admission controller: the single gate every remote call passes through.
//!
//! Requests wait in one of two queues (expedited for High/Urgent, normal for
//! the rest). A dispatch loop ticks at a fixed rate and admits requests
//! priority-queue first, but only while fewer than `max_concurrent` requests
//! are executing and the quota estimate stays above `safety_floor`.
//! Each admitted request runs as its own task; its bookkeeping is released by a
//! drop guard so completion, failure, panic and cancellation all decrement the
//! active counts.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{PrwatchError, Result};
use crate::limiter::quota::{QuotaTracker, RateLimitHeaders};
use crate::limiter::request::{DEFAULT_REQUEST_TIMEOUT, FetchRequest, RequestState};

/// Configuration for the admission controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Maximum requests executing at once, process-wide.
    pub max_concurrent: usize,
    /// Requests are held while remaining quota is at or below this.
    pub safety_floor: u32,
    /// Dispatch loop period.
    pub tick: Duration,
    /// Timeout used when a request carries a zero timeout.
    pub default_timeout: Duration,
    /// Capacity of each queue.
    pub queue_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            safety_floor: 10,
            tick: Duration::from_millis(100),
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            queue_capacity: 256,
        }
    }
}

impl ControllerConfig {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_safety_floor(mut self, floor: u32) -> Self {
        self.safety_floor = floor;
        self
    }
}

/// Counters for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStats {
    pub submitted: u64,
    pub admitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub rejected: u64,
    /// Requests executing right now
    pub active: usize,
    /// Requests queued or executing
    pub in_flight: usize,
}

type Job = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

struct QueuedRequest {
    request: FetchRequest,
    job: Job,
}

#[derive(Default)]
struct Bookkeeping {
    active: usize,
    per_source: HashMap<String, usize>,
    states: HashMap<String, RequestState>,
    stats: ControllerStats,
}

struct Inner {
    config: ControllerConfig,
    quota: Arc<QuotaTracker>,
    book: Mutex<Bookkeeping>,
}

impl Inner {
    fn book(&self) -> MutexGuard<'_, Bookkeeping> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn has_capacity(&self) -> bool {
        self.book().active < self.config.max_concurrent
    }

    fn set_state(&self, id: &str, state: RequestState) {
        let mut book = self.book();
        if let Some(current) = book.states.get_mut(id) {
            *current = state;
        }
    }

    /// Move a request to a terminal state, once.
    fn finish(&self, id: &str, state: RequestState) {
        let mut book = self.book();
        if book.states.remove(id).is_none() {
            return;
        }
        match state {
            RequestState::Succeeded => book.stats.succeeded += 1,
            RequestState::Failed => book.stats.failed += 1,
            RequestState::TimedOut => book.stats.timed_out += 1,
            _ => {}
        }
    }

    fn admit(&self, request: &FetchRequest) {
        let mut book = self.book();
        book.active += 1;
        *book.per_source.entry(request.source_id.clone()).or_insert(0) += 1;
        book.stats.admitted += 1;
        if let Some(state) = book.states.get_mut(&request.id) {
            *state = RequestState::Admitted;
        }
    }

    fn release(&self, source_id: &str) {
        let mut book = self.book();
        book.active = book.active.saturating_sub(1);
        if let Some(count) = book.per_source.get_mut(source_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                book.per_source.remove(source_id);
            }
        }
    }
}

/// Releases an admitted request's slot however its task ends.
struct ActiveGuard {
    inner: Arc<Inner>,
    source_id: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.inner.release(&self.source_id);
    }
}

/// Process-wide admission controller.
///
/// Construct one at the application root and share it (`Arc`) with every
/// consumer. Must be created inside a tokio runtime.
pub struct AdmissionController {
    inner: Arc<Inner>,
    priority_tx: mpsc::Sender<QueuedRequest>,
    normal_tx: mpsc::Sender<QueuedRequest>,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl AdmissionController {
    /// Create the controller and start its dispatch loop
    pub fn new(config: ControllerConfig, quota: Arc<QuotaTracker>) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (priority_tx, priority_rx) = mpsc::channel(capacity);
        let (normal_tx, normal_rx) = mpsc::channel(capacity);
        let inner = Arc::new(Inner {
            config,
            quota,
            book: Mutex::new(Bookkeeping::default()),
        });
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(dispatch_loop(
            Arc::clone(&inner),
            priority_rx,
            normal_rx,
            shutdown.clone(),
        ));

        Self {
            inner,
            priority_tx,
            normal_tx,
            shutdown,
            dispatcher: Mutex::new(Some(handle)),
        }
    }

    /// Shared quota tracker
    pub fn quota(&self) -> Arc<QuotaTracker> {
        Arc::clone(&self.inner.quota)
    }

    /// Feed real rate-limit headers into the quota bookkeeping
    pub fn update_from_headers(&self, headers: &RateLimitHeaders) {
        self.inner.quota.update_from_headers(headers);
    }

    /// Requests executing right now
    pub fn active_count(&self) -> usize {
        self.inner.book().active
    }

    /// Requests executing for one source
    pub fn active_for(&self, source_id: &str) -> usize {
        self.inner.book().per_source.get(source_id).copied().unwrap_or(0)
    }

    /// Current state of a request, while it is in flight
    pub fn request_state(&self, request_id: &str) -> Option<RequestState> {
        self.inner.book().states.get(request_id).copied()
    }

    /// Counters snapshot
    pub fn stats(&self) -> ControllerStats {
        let book = self.inner.book();
        let mut stats = book.stats.clone();
        stats.active = book.active;
        stats.in_flight = book.states.len();
        stats
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Submit an operation and wait for its result.
    ///
    /// Blocks until the operation finishes or `request.timeout` elapses
    /// (queue wait included). On timeout the operation's cancellation token is
    /// triggered so the underlying call aborts. The operation's own error is
    /// returned unchanged.
    pub async fn submit<T, F, Fut>(&self, request: FetchRequest, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            self.inner.book().stats.rejected += 1;
            return Err(PrwatchError::Shutdown("admission controller is shut down".to_string()));
        }

        let timeout = if request.timeout.is_zero() {
            self.inner.config.default_timeout
        } else {
            request.timeout
        };
        let deadline = Instant::now() + timeout;
        let request_id = request.id.clone();
        let source_id = request.source_id.clone();
        let cancel = request.cancel.clone();

        {
            let mut book = self.inner.book();
            book.stats.submitted += 1;
            book.states.insert(request_id.clone(), RequestState::Queued);
        }

        let (result_tx, result_rx) = oneshot::channel::<Result<T>>();
        let inner = Arc::clone(&self.inner);
        let job_id = request_id.clone();
        let job: Job = Box::new(move |token: CancellationToken| {
            async move {
                let result = op(token).await;
                let state = if result.is_ok() {
                    RequestState::Succeeded
                } else {
                    RequestState::Failed
                };
                inner.finish(&job_id, state);
                // Receiver gone means the caller timed out; nothing to deliver.
                let _ = result_tx.send(result);
            }
            .boxed()
        });

        let queue = if request.priority.is_expedited() {
            &self.priority_tx
        } else {
            &self.normal_tx
        };
        let priority = request.priority;

        tracing::trace!(request = %request_id, source = %source_id, priority = ?priority, "Request queued");

        match tokio::time::timeout_at(deadline, queue.send(QueuedRequest { request, job })).await {
            Err(_) => {
                cancel.cancel();
                self.inner.finish(&request_id, RequestState::TimedOut);
                tracing::warn!(source = %source_id, "Admission queue full, request timed out");
                return Err(PrwatchError::QuotaExhausted(format!(
                    "could not queue request for '{}' within {:?}",
                    source_id, timeout
                )));
            }
            Ok(Err(_)) => {
                self.inner.finish(&request_id, RequestState::Failed);
                return Err(PrwatchError::Shutdown("admission controller is shut down".to_string()));
            }
            Ok(Ok(())) => {}
        }

        tokio::select! {
            result = result_rx => match result {
                Ok(result) => result,
                Err(_) => {
                    // Dropped without running: discarded at shutdown or cancelled while queued.
                    self.inner.finish(&request_id, RequestState::Failed);
                    if cancel.is_cancelled() {
                        Err(PrwatchError::Cancelled)
                    } else {
                        Err(PrwatchError::Shutdown("request discarded before execution".to_string()))
                    }
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                cancel.cancel();
                self.inner.finish(&request_id, RequestState::TimedOut);
                tracing::warn!(source = %source_id, timeout_ms = timeout.as_millis() as u64, "Request timed out");
                Err(PrwatchError::Timeout(timeout))
            }
            _ = cancel.cancelled() => {
                self.inner.finish(&request_id, RequestState::Failed);
                Err(PrwatchError::Cancelled)
            }
        }
    }

    /// Stop admitting work.
    ///
    /// Queued requests are discarded (their callers get `Shutdown`), requests
    /// already executing run to completion, later submissions are rejected.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.dispatcher.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = ?e, "Dispatch loop panicked");
            }
        }
    }
}

impl Drop for AdmissionController {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn dispatch_loop(
    inner: Arc<Inner>,
    mut priority_rx: mpsc::Receiver<QueuedRequest>,
    mut normal_rx: mpsc::Receiver<QueuedRequest>,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(inner.config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        while inner.has_capacity() {
            if !inner.quota.has_headroom(inner.config.safety_floor) {
                tracing::debug!(
                    remaining = inner.quota.remaining(),
                    floor = inner.config.safety_floor,
                    "Quota at safety floor, holding queued requests"
                );
                break;
            }

            let next = match priority_rx.try_recv() {
                Ok(queued) => Some(queued),
                Err(_) => normal_rx.try_recv().ok(),
            };
            let Some(queued) = next else {
                break;
            };

            if queued.request.cancel.is_cancelled() {
                // Caller already gave up; dropping the job drops its result channel.
                continue;
            }

            inner.quota.consume(1);
            inner.admit(&queued.request);
            spawn_admitted(Arc::clone(&inner), queued);
        }
    }

    priority_rx.close();
    normal_rx.close();
    let mut discarded = 0usize;
    while priority_rx.try_recv().is_ok() {
        discarded += 1;
    }
    while normal_rx.try_recv().is_ok() {
        discarded += 1;
    }
    tracing::debug!(discarded, "Dispatch loop stopped");
}

fn spawn_admitted(inner: Arc<Inner>, queued: QueuedRequest) {
    let QueuedRequest { request, job } = queued;
    tokio::spawn(async move {
        let _guard = ActiveGuard {
            inner: Arc::clone(&inner),
            source_id: request.source_id.clone(),
        };
        inner.set_state(&request.id, RequestState::Executing);
        tracing::trace!(request = %request.id, source = %request.source_id, "Request executing");

        let token = request.cancel.clone();
        tokio::select! {
            _ = job(token.clone()) => {}
            _ = token.cancelled() => {
                tracing::debug!(request = %request.id, "Request cancelled while executing");
            }
        }
    });
}
