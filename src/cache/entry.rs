//! Cache entries with their own TTL

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::deadline_after;

/// One cached value. Immutable once written; a new `set` replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    /// When the value was written
    pub timestamp: DateTime<Utc>,
    /// Time-to-live in milliseconds
    pub ttl_ms: u64,
}

impl<T> CacheEntry<T> {
    /// Wrap a value written now
    pub fn new(data: T, ttl: Duration) -> Self {
        Self {
            data,
            timestamp: Utc::now(),
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// When this entry stops being served
    pub fn expires_at(&self) -> DateTime<Utc> {
        deadline_after(self.timestamp, self.ttl())
    }

    /// `now >= timestamp + ttl`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Time since the value was written
    pub fn age(&self) -> Duration {
        (Utc::now() - self.timestamp).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Expiry fields of a stored entry, read without decoding its payload.
#[derive(Debug, Deserialize)]
pub(crate) struct EntryHeader {
    pub timestamp: DateTime<Utc>,
    pub ttl_ms: u64,
}

impl EntryHeader {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= deadline_after(self.timestamp, Duration::from_millis(self.ttl_ms))
    }
}
