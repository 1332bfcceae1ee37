//! Remote API quota snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default hourly request allowance of the remote API
pub const DEFAULT_QUOTA_LIMIT: u32 = 5000;

/// Current quota as last reported by the remote API.
///
/// Only response headers are authoritative; between header updates `remaining`
/// is an optimistic local estimate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// When a real header last updated this snapshot (None = never)
    pub last_update: Option<DateTime<Utc>>,
}

impl QuotaStatus {
    /// Assume a full allowance until the first real response says otherwise
    pub fn optimistic(limit: u32) -> Self {
        Self {
            limit,
            remaining: limit,
            reset_at: Utc::now() + chrono::Duration::hours(1),
            last_update: None,
        }
    }

    /// Fraction of the allowance still available (0.0 - 1.0)
    pub fn headroom(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        self.remaining as f64 / self.limit as f64
    }

    /// Whether the reset time has passed
    pub fn is_reset_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }
}

impl Default for QuotaStatus {
    fn default() -> Self {
        Self::optimistic(DEFAULT_QUOTA_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimistic_quota() {
        let quota = QuotaStatus::optimistic(5000);
        assert_eq!(quota.remaining, 5000);
        assert!(quota.last_update.is_none());
        assert!(!quota.is_reset_due(Utc::now()));
    }

    #[test]
    fn test_headroom() {
        let mut quota = QuotaStatus::optimistic(1000);
        quota.remaining = 250;
        assert!((quota.headroom() - 0.25).abs() < f64::EPSILON);
        quota.limit = 0;
        assert_eq!(quota.headroom(), 0.0);
    }
}
