//! ID and hashing utilities for prwatch
//!
//! Provides request identifiers, the short stable digests used for cache keys
//! and refresh staggering, and saturating deadline arithmetic.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Number of digest bytes kept in a short hash (16 hex chars).
const SHORT_HASH_BYTES: usize = 8;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a unique request ID
///
/// Format: `req-{source}-{timestamp_ms}-{random_hex}`
/// Example: `req-team-prs-1738300800123-a1b2`
pub fn generate_request_id(source_id: &str) -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("req-{}-{}-{:04x}", source_id, timestamp, random)
}

/// Stable short digest of the given parts.
///
/// Parts are length-prefixed before hashing so `("ab", "c")` and `("a", "bc")`
/// never collide.
pub fn short_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..SHORT_HASH_BYTES])
}

/// Stable 64-bit hash of a string, used for deterministic stagger offsets.
pub fn stable_u64(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// `at + after`, saturating at the latest representable time instead of panicking
pub fn deadline_after(at: DateTime<Utc>, after: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(after)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
