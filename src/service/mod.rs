//! Application-root service tying the fetch layer together
//!
//! [`PollService`] owns the admission controller, refresh scheduler, caches
//! and enhancer, runs one timer per source plus the maintenance loops, and
//! reports progress as [`SourceEvent`]s.

mod config;
mod events;
mod poll;

pub use config::{QuotaConfig, ServiceConfig, SourceConfig};
pub use events::SourceEvent;
pub use poll::{PollService, QuotaReport};
