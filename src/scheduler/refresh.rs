//! Refresh scheduler: decides when each source may poll.
//!
//! A source may refresh when its own timer is due, its estimated cost fits in
//! the remaining quota (plus a buffer), fewer than `max_simultaneous` sources
//! are refreshing, and `min_interval` has passed since the last refresh of any
//! source. First refreshes are staggered by a hash of the source id so many
//! sources registered together do not all poll at once.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::id::{deadline_after, stable_u64};
use crate::limiter::{Priority, QuotaTracker};
use crate::scheduler::schedule::{SourceSchedule, estimate_cost, to_chrono};

/// Step used to move a stagger offset off a colliding one (prime, in ms).
const STAGGER_STEP_MS: u64 = 1009;

/// Below this remaining quota intervals grow.
pub const LOW_QUOTA_MARK: u32 = 1000;
/// Above this remaining quota intervals shrink.
pub const HIGH_QUOTA_MARK: u32 = 3000;
/// Growth factor when quota is low.
pub const SLOWDOWN_FACTOR: f64 = 1.5;
/// Shrink factor when quota is plentiful.
pub const SPEEDUP_FACTOR: f64 = 0.9;
/// Longest interval the adjustment will produce.
pub const MAX_INTERVAL: Duration = Duration::from_secs(30 * 60);
/// Shortest interval the adjustment will produce.
pub const MIN_ADJUSTED_INTERVAL: Duration = Duration::from_secs(60);

/// Scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Minimum gap between refreshes of any two sources
    pub min_interval: Duration,
    /// Maximum sources refreshing at once
    pub max_simultaneous: usize,
    /// Quota kept in reserve on top of a source's estimated cost
    pub quota_buffer: u32,
    /// Window first refreshes are spread over (zero disables staggering)
    pub stagger_window: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(30),
            max_simultaneous: 2,
            quota_buffer: 100,
            stagger_window: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn with_max_simultaneous(mut self, max: usize) -> Self {
        self.max_simultaneous = max;
        self
    }

    pub fn with_stagger_window(mut self, window: Duration) -> Self {
        self.stagger_window = window;
        self
    }

    pub fn with_quota_buffer(mut self, buffer: u32) -> Self {
        self.quota_buffer = buffer;
        self
    }
}

/// Outcome of one interval adjustment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntervalAdjustment {
    /// Intervals multiplied by the slowdown factor
    SlowedDown,
    /// Intervals multiplied by the speedup factor
    SpedUp,
    Unchanged,
}

#[derive(Debug, Default)]
struct SchedulerState {
    schedules: HashMap<String, SourceSchedule>,
    last_global_refresh: Option<DateTime<Utc>>,
}

impl SchedulerState {
    fn refreshing_count(&self) -> usize {
        self.schedules.values().filter(|s| s.refreshing).count()
    }
}

/// Per-source refresh gate
#[derive(Debug)]
pub struct RefreshScheduler {
    config: SchedulerConfig,
    quota: Arc<QuotaTracker>,
    state: RwLock<SchedulerState>,
}

impl RefreshScheduler {
    pub fn new(config: SchedulerConfig, quota: Arc<QuotaTracker>) -> Self {
        Self {
            config,
            quota,
            state: RwLock::new(SchedulerState::default()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, SchedulerState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SchedulerState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Stagger offset for `source_id`, distinct from every offset in `taken`
    fn stagger_for(&self, source_id: &str, taken: &HashSet<Duration>) -> Duration {
        let window_ms = self.config.stagger_window.as_millis() as u64;
        if window_ms == 0 {
            return Duration::ZERO;
        }
        let mut offset = stable_u64(source_id) % window_ms;
        for _ in 0..window_ms {
            if !taken.contains(&Duration::from_millis(offset)) {
                break;
            }
            offset = (offset + STAGGER_STEP_MS) % window_ms;
        }
        Duration::from_millis(offset)
    }

    /// Register a source (replacing any previous schedule for the id).
    ///
    /// The first refresh is at `now + stagger`, where the stagger is derived
    /// from the id and distinct from every other registered source's.
    pub fn add_source(&self, source_id: &str, interval: Duration, priority: Priority) -> SourceSchedule {
        let mut state = self.write();
        state.schedules.remove(source_id);
        let taken: HashSet<Duration> = state.schedules.values().map(|s| s.stagger).collect();
        let stagger = self.stagger_for(source_id, &taken);
        let schedule = SourceSchedule::new(source_id, interval, priority, stagger, Utc::now());

        tracing::debug!(
            source = %source_id,
            interval_secs = interval.as_secs(),
            stagger_ms = stagger.as_millis() as u64,
            priority = ?priority,
            "Source scheduled"
        );
        state.schedules.insert(source_id.to_string(), schedule.clone());
        schedule
    }

    /// Forget a source. Returns whether it was registered.
    pub fn remove_source(&self, source_id: &str) -> bool {
        let removed = self.write().schedules.remove(source_id).is_some();
        if removed {
            tracing::debug!(source = %source_id, "Source unscheduled");
        }
        removed
    }

    pub fn schedule(&self, source_id: &str) -> Option<SourceSchedule> {
        self.read().schedules.get(source_id).cloned()
    }

    /// Ids of all registered sources, sorted
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().schedules.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.read().schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().schedules.is_empty()
    }

    /// Sources currently between start and completion
    pub fn refreshing_count(&self) -> usize {
        self.read().refreshing_count()
    }

    /// Whether `source_id` may refresh right now
    pub fn should_refresh(&self, source_id: &str) -> bool {
        self.should_refresh_at(source_id, Utc::now())
    }

    fn should_refresh_at(&self, source_id: &str, now: DateTime<Utc>) -> bool {
        self.gate_open(&self.read(), source_id, now)
    }

    fn gate_open(&self, state: &SchedulerState, source_id: &str, now: DateTime<Utc>) -> bool {
        let Some(schedule) = state.schedules.get(source_id) else {
            return false;
        };
        if !schedule.is_due_at(now) {
            return false;
        }

        let remaining = self.quota.remaining();
        if schedule.estimated_cost.saturating_add(self.config.quota_buffer) > remaining {
            tracing::debug!(
                source = %source_id,
                cost = schedule.estimated_cost,
                remaining,
                "Refresh deferred: insufficient quota"
            );
            return false;
        }

        if state.refreshing_count() >= self.config.max_simultaneous {
            return false;
        }

        match state.last_global_refresh {
            Some(last) => now - last >= to_chrono(self.config.min_interval),
            None => true,
        }
    }

    /// Check the gate and mark the refresh started in one step.
    ///
    /// Concurrent timers racing for the last refresh slot see exactly one winner.
    pub fn try_begin_refresh(&self, source_id: &str) -> bool {
        self.try_begin_refresh_at(source_id, Utc::now())
    }

    fn try_begin_refresh_at(&self, source_id: &str, now: DateTime<Utc>) -> bool {
        let mut state = self.write();
        if !self.gate_open(&state, source_id, now) {
            return false;
        }
        Self::begin(&mut state, source_id, now)
    }

    /// Record that a refresh began: `next_refresh` advances by exactly one interval.
    pub fn mark_refresh_started(&self, source_id: &str) -> bool {
        self.mark_refresh_started_at(source_id, Utc::now())
    }

    fn mark_refresh_started_at(&self, source_id: &str, now: DateTime<Utc>) -> bool {
        Self::begin(&mut self.write(), source_id, now)
    }

    fn begin(state: &mut SchedulerState, source_id: &str, now: DateTime<Utc>) -> bool {
        let Some(schedule) = state.schedules.get_mut(source_id) else {
            return false;
        };
        schedule.last_refresh = Some(now);
        schedule.next_refresh = deadline_after(now, schedule.interval);
        schedule.refreshing = true;
        state.last_global_refresh = Some(now);
        tracing::trace!(source = %source_id, "Refresh started");
        true
    }

    /// Record that a refresh finished, refining the cost estimate from the
    /// number of items it returned.
    pub fn mark_refresh_complete(&self, source_id: &str, items: Option<usize>) {
        let mut state = self.write();
        if let Some(schedule) = state.schedules.get_mut(source_id) {
            schedule.refreshing = false;
            if let Some(items) = items {
                schedule.estimated_cost = estimate_cost(items.min(u32::MAX as usize) as u32);
            }
            tracing::trace!(source = %source_id, cost = schedule.estimated_cost, "Refresh complete");
        }
    }

    /// Time until `source_id` is next due (None when unknown)
    pub fn time_until_due(&self, source_id: &str) -> Option<Duration> {
        let now = Utc::now();
        self.read().schedules.get(source_id).map(|s| s.time_until_due(now))
    }

    /// Due sources, highest priority first, then cheapest first
    pub fn optimal_refresh_order(&self) -> Vec<String> {
        self.optimal_refresh_order_at(Utc::now())
    }

    fn optimal_refresh_order_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let state = self.read();
        let mut due: Vec<&SourceSchedule> = state.schedules.values().filter(|s| s.is_due_at(now)).collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.estimated_cost.cmp(&b.estimated_cost))
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        due.into_iter().map(|s| s.source_id.clone()).collect()
    }

    /// Scale every interval by current quota: slower when scarce, faster when plentiful.
    pub fn adjust_refresh_intervals(&self) -> IntervalAdjustment {
        let remaining = self.quota.remaining();
        let adjustment = if remaining < LOW_QUOTA_MARK {
            IntervalAdjustment::SlowedDown
        } else if remaining > HIGH_QUOTA_MARK {
            IntervalAdjustment::SpedUp
        } else {
            return IntervalAdjustment::Unchanged;
        };

        let mut state = self.write();
        for schedule in state.schedules.values_mut() {
            schedule.interval = match adjustment {
                IntervalAdjustment::SlowedDown if schedule.interval < MAX_INTERVAL => {
                    schedule.interval.mul_f64(SLOWDOWN_FACTOR).min(MAX_INTERVAL)
                }
                IntervalAdjustment::SpedUp if schedule.interval > MIN_ADJUSTED_INTERVAL => {
                    schedule.interval.mul_f64(SPEEDUP_FACTOR).max(MIN_ADJUSTED_INTERVAL)
                }
                _ => schedule.interval,
            };
        }

        tracing::debug!(remaining, adjustment = ?adjustment, sources = state.schedules.len(), "Refresh intervals adjusted");
        adjustment
    }
}
