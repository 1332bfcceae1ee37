//! Caching layers
//!
//! - [`PersistentCache`] - disk-backed TTL cache wrapped around fetchers
//! - [`SharedCache`] - short-TTL in-memory cache deduplicating work across sources

mod entry;
mod persistent;
mod shared;

pub use entry::CacheEntry;
pub use persistent::{CacheStats, PersistentCache};
pub use shared::{DEFAULT_SHARED_TTL, SharedCache};

use crate::id::short_hash;

/// Default TTL of fetch results in the persistent cache
pub const DEFAULT_CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(300);

/// Derive a cache key from a fetcher identity and a parameter signature.
///
/// Deterministic, 16 lowercase hex chars.
pub fn generate_key(source_identity: &str, params_signature: &str) -> String {
    short_hash(&[source_identity, params_signature])
}
