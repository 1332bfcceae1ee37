//! Admission control for remote API calls.
//!
//! This module provides:
//! - **Quota tracking**: authoritative quota from response headers, optimistic
//!   estimates in between, coordinated backoff on secondary rate limits.
//! - **Admission controller**: priority queues, a process-wide concurrency cap
//!   and a quota safety floor, with per-request timeouts and cancellation.
//!
//! # Example
//!
//! ```ignore
//! use prwatch::limiter::{AdmissionController, ControllerConfig, FetchRequest, Priority, QuotaTracker};
//!
//! let controller = AdmissionController::new(ControllerConfig::default(), Arc::new(QuotaTracker::default()));
//! let items = controller
//!     .submit(FetchRequest::new("team", Priority::Normal), |cancel| async move { fetch(cancel).await })
//!     .await?;
//! ```

mod controller;
mod quota;
mod request;

pub use controller::{AdmissionController, ControllerConfig, ControllerStats};
pub use quota::{DEFAULT_CRITICAL_THRESHOLD, QuotaTracker, RateLimitHeaders};
pub use request::{DEFAULT_REQUEST_TIMEOUT, FetchRequest, Priority, RequestState};
