//! prwatch - quota-aware pull request polling
//!
//! Coordinates many pull request sources against one shared API quota: an
//! admission controller gates every request, a refresh scheduler decides when
//! each source polls, results are cached on disk with a TTL, and per-item
//! detail is fetched through a bounded worker pool.

pub mod api;
pub mod cache;
pub mod domain;
pub mod enhance;
pub mod error;
pub mod fetch;
pub mod id;
pub mod limiter;
pub mod pool;
pub mod scheduler;
pub mod service;

pub use error::{PrwatchError, Result};
