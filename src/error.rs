//! Error types for prwatch
//!
//! Centralized error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

/// All error types that can occur in prwatch
#[derive(Debug, Error)]
pub enum PrwatchError {
    /// Bad or missing credentials
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Remote quota is exhausted (or admission could not be granted in time)
    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Request did not complete within its timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Network failure talking to the remote API
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed source identifier
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    /// Every sub-request of a fan-out failed
    #[error("{failed} of {total} sources failed: {}", errors.join("; "))]
    PartialFailure {
        failed: usize,
        total: usize,
        errors: Vec<String>,
    },

    /// Optimized query failed; only ever seen inside the optimized fetcher
    #[error("Degraded path: {0}")]
    Degraded(String),

    /// Unreadable or corrupt cache entry
    #[error("Cache IO error: {0}")]
    CacheIo(String),

    /// Non-success response from the remote API
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Component has been shut down and no longer accepts work
    #[error("Shut down: {0}")]
    Shutdown(String),

    /// Operation was cancelled by its caller
    #[error("Cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PrwatchError {
    /// Whether the error means the request never got (or kept) its admission slot.
    pub fn is_quota_or_timeout(&self) -> bool {
        matches!(self, PrwatchError::QuotaExhausted(_) | PrwatchError::Timeout(_))
    }

    /// Errors worth retrying on the next scheduled refresh.
    pub fn is_retryable(&self) -> bool {
        match self {
            PrwatchError::QuotaExhausted(_) | PrwatchError::Timeout(_) | PrwatchError::Transport(_) => true,
            PrwatchError::Api { status, .. } => *status >= 500,
            PrwatchError::PartialFailure { .. } => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for PrwatchError {
    fn from(err: reqwest::Error) -> Self {
        PrwatchError::Transport(err.to_string())
    }
}

/// Result type alias for prwatch operations
pub type Result<T> = std::result::Result<T, PrwatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error() {
        let err = PrwatchError::Auth("bad credentials".to_string());
        assert_eq!(err.to_string(), "Authentication failed: bad credentials");
    }

    #[test]
    fn test_partial_failure_message() {
        let err = PrwatchError::PartialFailure {
            failed: 2,
            total: 2,
            errors: vec!["a: boom".to_string(), "b: bang".to_string()],
        };
        assert_eq!(err.to_string(), "2 of 2 sources failed: a: boom; b: bang");
    }

    #[test]
    fn test_quota_or_timeout_classification() {
        assert!(PrwatchError::QuotaExhausted("queue full".to_string()).is_quota_or_timeout());
        assert!(PrwatchError::Timeout(Duration::from_secs(30)).is_quota_or_timeout());
        assert!(!PrwatchError::Transport("reset".to_string()).is_quota_or_timeout());
        assert!(!PrwatchError::Cancelled.is_quota_or_timeout());
    }

    #[test]
    fn test_is_retryable() {
        assert!(PrwatchError::Transport("reset".to_string()).is_retryable());
        assert!(
            PrwatchError::Api {
                status: 502,
                message: "bad gateway".to_string()
            }
            .is_retryable()
        );
        assert!(
            !PrwatchError::Api {
                status: 404,
                message: "not found".to_string()
            }
            .is_retryable()
        );
        assert!(!PrwatchError::InvalidSource("repos:".to_string()).is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PrwatchError = io_err.into();
        assert!(matches!(err, PrwatchError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: PrwatchError = json_err.into();
        assert!(matches!(err, PrwatchError::Json(_)));
    }
}
