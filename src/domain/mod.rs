//! Domain types for prwatch
//!
//! This module contains the core domain types:
//! - PullRequest: the item every source fetch returns
//! - EnhancedItem: per-item detail attached by enrichment
//! - FilterConfig: listing options and exclusion rules for one fetch
//! - SourceSpec: parsed source identifiers (repos, org, label, topic, query)
//! - QuotaStatus: remote API quota snapshot

pub mod filter;
pub mod item;
pub mod quota;
pub mod source;

pub use filter::{DEFAULT_MAX_RESULTS, FilterConfig};
pub use item::{CheckStatus, EnhancedItem, MergeState, PullRequest, ReviewStatus};
pub use quota::{DEFAULT_QUOTA_LIMIT, QuotaStatus};
pub use source::SourceSpec;
