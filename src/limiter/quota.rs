//! Quota bookkeeping shared by every request.
//!
//! The remote API reports its quota in response headers. Those headers are the
//! only source of truth; between them the tracker keeps an optimistic estimate
//! (decremented per admitted request, refilled once the reset time passes).
//!
//! Secondary rate limits (429 / abuse responses) trigger a coordinated
//! exponential backoff for all callers.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::domain::QuotaStatus;
use crate::error::{PrwatchError, Result};

/// Below this many remaining requests `wait` blocks until the reset.
pub const DEFAULT_CRITICAL_THRESHOLD: u32 = 50;

/// Upper bound on a single quota sleep, so cancellation and header updates are
/// observed even when the reset is far away.
const MAX_WAIT_SLICE: Duration = Duration::from_secs(5);

/// Rate limit values parsed from one API response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug)]
struct TrackerState {
    status: QuotaStatus,
    /// When calls may resume after a secondary rate limit (None = no backoff).
    backoff_until: Option<Instant>,
    /// Number of consecutive rate limit hits.
    consecutive_hits: u32,
}

impl TrackerState {
    /// Refill the optimistic estimate once the reset time has passed.
    fn apply_reset(&mut self, now: DateTime<Utc>) {
        if self.status.is_reset_due(now) {
            self.status.remaining = self.status.limit;
            self.status.reset_at = now + chrono::Duration::hours(1);
            tracing::debug!(limit = self.status.limit, "Quota window reset, assuming full allowance");
        }
    }
}

/// Process-wide quota state
#[derive(Debug)]
pub struct QuotaTracker {
    state: Mutex<TrackerState>,
    critical_threshold: u32,
}

impl QuotaTracker {
    /// Create a tracker assuming a full allowance of `limit`
    pub fn new(limit: u32) -> Self {
        Self::with_threshold(limit, DEFAULT_CRITICAL_THRESHOLD)
    }

    /// Create a tracker with a custom critical threshold
    pub fn with_threshold(limit: u32, critical_threshold: u32) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                status: QuotaStatus::optimistic(limit),
                backoff_until: None,
                consecutive_hits: 0,
            }),
            critical_threshold,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // Plain counters: a panic mid-update cannot leave them unusable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current quota snapshot
    pub fn status(&self) -> QuotaStatus {
        let mut state = self.lock();
        state.apply_reset(Utc::now());
        state.status.clone()
    }

    /// Remaining requests (estimate between header updates)
    pub fn remaining(&self) -> u32 {
        self.status().remaining
    }

    /// Threshold below which `wait` blocks
    pub fn critical_threshold(&self) -> u32 {
        self.critical_threshold
    }

    /// Overwrite the quota with values from real response headers.
    pub fn update_from_headers(&self, headers: &RateLimitHeaders) {
        let mut state = self.lock();
        if let Some(limit) = headers.limit {
            state.status.limit = limit;
        }
        state.status.remaining = headers.remaining;
        state.status.reset_at = headers.reset_at;
        state.status.last_update = Some(Utc::now());
        tracing::trace!(
            remaining = headers.remaining,
            reset_at = %headers.reset_at,
            "Quota updated from response headers"
        );
    }

    /// Optimistically debit `cost` requests
    pub fn consume(&self, cost: u32) {
        let mut state = self.lock();
        state.apply_reset(Utc::now());
        state.status.remaining = state.status.remaining.saturating_sub(cost);
    }

    /// Whether more than `floor` requests remain and no backoff is active
    pub fn has_headroom(&self, floor: u32) -> bool {
        let mut state = self.lock();
        state.apply_reset(Utc::now());
        let backing_off = state.backoff_until.map(|until| Instant::now() < until).unwrap_or(false);
        !backing_off && state.status.remaining > floor
    }

    /// Check if we are currently backing off from a secondary rate limit.
    pub fn is_rate_limited(&self) -> bool {
        self.lock()
            .backoff_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    /// Get remaining backoff duration if rate limited.
    pub fn remaining_backoff(&self) -> Option<Duration> {
        self.lock().backoff_until.and_then(|until| {
            let now = Instant::now();
            if now < until { Some(until - now) } else { None }
        })
    }

    /// Record a rate limit response.
    ///
    /// The delay is the maximum of the API's suggested retry_after and
    /// 2^consecutive_hits seconds (capped at 64s).
    pub fn record_rate_limit(&self, retry_after: Duration) {
        let mut state = self.lock();
        state.consecutive_hits += 1;

        let exp_backoff = Duration::from_secs(2u64.pow(state.consecutive_hits.min(6)));
        let delay = retry_after.max(exp_backoff);
        state.backoff_until = Some(Instant::now() + delay);

        tracing::warn!(
            retry_after_secs = delay.as_secs(),
            consecutive_hits = state.consecutive_hits,
            "Rate limited, backing off globally"
        );
    }

    /// Record a successful API call, clearing any backoff.
    pub fn record_success(&self) {
        let mut state = self.lock();
        state.consecutive_hits = 0;
        state.backoff_until = None;
    }

    /// How long a caller should hold off before the next call (None = go now)
    fn required_delay(&self) -> Option<Duration> {
        let mut state = self.lock();
        let now = Utc::now();
        state.apply_reset(now);

        if let Some(until) = state.backoff_until {
            let instant_now = Instant::now();
            if instant_now < until {
                return Some(until - instant_now);
            }
        }

        if state.status.remaining < self.critical_threshold {
            let until_reset = (state.status.reset_at - now).to_std().unwrap_or(Duration::ZERO);
            return Some(until_reset);
        }

        None
    }

    /// Block until a call may proceed.
    ///
    /// Returns immediately with healthy quota. Below the critical threshold it
    /// sleeps until the reset time (or backoff expiry); cancellation returns
    /// `PrwatchError::Cancelled`.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(PrwatchError::Cancelled);
            }
            let Some(delay) = self.required_delay() else {
                return Ok(());
            };

            tracing::debug!(delay_ms = delay.as_millis() as u64, "Quota low, waiting");
            // Sleep at least a little so a reset exactly at `now` makes progress.
            let slice = delay.min(MAX_WAIT_SLICE).max(Duration::from_millis(1));
            tokio::select! {
                _ = cancel.cancelled() => return Err(PrwatchError::Cancelled),
                _ = tokio::time::sleep(slice) => {}
            }
        }
    }
}

impl Default for QuotaTracker {
    fn default() -> Self {
        Self::new(crate::domain::DEFAULT_QUOTA_LIMIT)
    }
}
