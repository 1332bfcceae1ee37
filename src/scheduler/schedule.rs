//! Per-source refresh schedule and cost heuristic

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::deadline_after;
use crate::limiter::Priority;

/// Calls one plain refresh costs (list page plus slack for pagination).
pub const BASE_REFRESH_COST: u32 = 2;

/// Detail calls one enriched item costs (detail, reviews, check runs).
pub const DETAIL_CALLS_PER_ITEM: u32 = 3;

/// Items assumed to need enrichment before a source has reported any.
pub const DEFAULT_ENRICHMENT_ITEMS: u32 = 10;

/// Items beyond this are not enriched in one refresh, so they do not add cost.
pub const MAX_ENRICHMENT_ITEMS: u32 = 50;

/// Estimated quota cost of refreshing a source: a flat base plus enrichment.
pub fn estimate_cost(enrichment_items: u32) -> u32 {
    BASE_REFRESH_COST + enrichment_items.min(MAX_ENRICHMENT_ITEMS) * DETAIL_CALLS_PER_ITEM
}

/// Refresh bookkeeping for one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSchedule {
    pub source_id: String,
    pub interval: Duration,
    pub last_refresh: Option<DateTime<Utc>>,
    pub next_refresh: DateTime<Utc>,
    pub priority: Priority,
    pub estimated_cost: u32,
    /// Offset added to the first refresh
    pub stagger: Duration,
    /// Between `mark_refresh_started` and `mark_refresh_complete`
    pub refreshing: bool,
}

impl SourceSchedule {
    pub(crate) fn new(
        source_id: impl Into<String>,
        interval: Duration,
        priority: Priority,
        stagger: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            interval,
            last_refresh: None,
            next_refresh: deadline_after(now, stagger),
            priority,
            estimated_cost: estimate_cost(DEFAULT_ENRICHMENT_ITEMS),
            stagger,
            refreshing: false,
        }
    }

    /// Whether the next refresh time has been reached
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        !self.refreshing && now >= self.next_refresh
    }

    /// Time left until the next refresh (zero when due)
    pub fn time_until_due(&self, now: DateTime<Utc>) -> Duration {
        (self.next_refresh - now).to_std().unwrap_or(Duration::ZERO)
    }
}

pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
