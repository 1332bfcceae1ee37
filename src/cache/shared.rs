//! Short-lived in-memory cache shared between sources.
//!
//! Overlapping sources (an org and a repo list covering the same repository)
//! see the same pull requests within one refresh window. Entries live for a
//! short TTL so the second consumer reuses the first one's work. Each entry
//! records which consumers read or wrote it; that set is for display only.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default lifetime of shared entries
pub const DEFAULT_SHARED_TTL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct SharedEntry<T> {
    value: T,
    stored_at: Instant,
    consumers: HashSet<String>,
}

/// Cross-consumer dedup cache
#[derive(Debug)]
pub struct SharedCache<T> {
    ttl: Duration,
    entries: Mutex<HashMap<String, SharedEntry<T>>>,
}

impl<T: Clone> SharedCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SharedEntry<T>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, recording `consumer` as a user of it
    pub fn get(&self, key: &str, consumer: &str) -> Option<T> {
        let mut entries = self.lock();
        let expired = entries.get(key)?.stored_at.elapsed() >= self.ttl;
        if expired {
            entries.remove(key);
            return None;
        }
        let entry = entries.get_mut(key)?;
        entry.consumers.insert(consumer.to_string());
        Some(entry.value.clone())
    }

    /// Store `value`, replacing any previous entry and its consumer set
    pub fn insert(&self, key: &str, value: T, consumer: &str) {
        let mut consumers = HashSet::new();
        consumers.insert(consumer.to_string());
        self.lock().insert(
            key.to_string(),
            SharedEntry {
                value,
                stored_at: Instant::now(),
                consumers,
            },
        );
    }

    /// Consumers that used `key`, sorted
    pub fn consumers(&self, key: &str) -> Vec<String> {
        let entries = self.lock();
        let mut consumers: Vec<String> = entries
            .get(key)
            .map(|e| e.consumers.iter().cloned().collect())
            .unwrap_or_default();
        consumers.sort();
        consumers
    }

    /// Drop stale entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl<T: Clone> Default for SharedCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_SHARED_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let cache = SharedCache::new(Duration::from_secs(60));
        cache.insert("a/b#1", 10, "team");
        assert_eq!(cache.get("a/b#1", "org"), Some(10));
        assert_eq!(cache.consumers("a/b#1"), vec!["org".to_string(), "team".to_string()]);
    }

    #[test]
    fn test_expired_entries_miss() {
        let cache = SharedCache::new(Duration::from_millis(10));
        cache.insert("k", "v", "team");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k", "team"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let cache = SharedCache::new(Duration::from_millis(10));
        cache.insert("a", 1, "x");
        cache.insert("b", 2, "x");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_insert_replaces_consumers() {
        let cache = SharedCache::new(Duration::from_secs(60));
        cache.insert("k", 1, "a");
        cache.get("k", "b");
        cache.insert("k", 2, "c");
        assert_eq!(cache.consumers("k"), vec!["c".to_string()]);
        assert_eq!(cache.get("k", "c"), Some(2));
    }
}
