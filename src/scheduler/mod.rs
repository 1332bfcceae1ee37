//! Per-source refresh scheduling.
//!
//! This module provides:
//! - **Schedules**: one [`SourceSchedule`] per registered source with its
//!   interval, next due time, priority and estimated quota cost.
//! - **Refresh gate**: [`RefreshScheduler::should_refresh`] combines the
//!   source's timer, the remaining quota, a cap on simultaneous refreshes and
//!   a global minimum gap between refreshes.
//! - **Adaptive intervals**: [`RefreshScheduler::adjust_refresh_intervals`]
//!   stretches every interval when quota runs low and tightens them when it
//!   is plentiful.
//!
//! # Example
//!
//! ```ignore
//! use prwatch::scheduler::{RefreshScheduler, SchedulerConfig};
//!
//! let scheduler = RefreshScheduler::new(SchedulerConfig::default(), quota);
//! scheduler.add_source("team", Duration::from_secs(300), Priority::Normal);
//! for id in scheduler.optimal_refresh_order() {
//!     if scheduler.should_refresh(&id) {
//!         scheduler.mark_refresh_started(&id);
//!         // ... fetch ...
//!         scheduler.mark_refresh_complete(&id, Some(items.len()));
//!     }
//! }
//! ```

mod refresh;
mod schedule;

pub use refresh::{
    HIGH_QUOTA_MARK, IntervalAdjustment, LOW_QUOTA_MARK, MAX_INTERVAL, MIN_ADJUSTED_INTERVAL, RefreshScheduler,
    SLOWDOWN_FACTOR, SPEEDUP_FACTOR, SchedulerConfig,
};
pub use schedule::{
    BASE_REFRESH_COST, DEFAULT_ENRICHMENT_ITEMS, DETAIL_CALLS_PER_ITEM, MAX_ENRICHMENT_ITEMS, SourceSchedule,
    estimate_cost,
};
