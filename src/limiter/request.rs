//! Requests submitted to the admission controller

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::id::generate_request_id;

/// Default time a request may spend queued plus executing
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Request priority tiers. High and Urgent share the expedited queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// Whether requests of this tier go to the priority queue
    pub fn is_expedited(&self) -> bool {
        *self >= Priority::High
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Lifecycle of one admitted call.
///
/// `Queued -> Admitted -> Executing -> {Succeeded, Failed}`; `TimedOut` may be
/// entered from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Queued,
    Admitted,
    Executing,
    Succeeded,
    Failed,
    TimedOut,
}

impl RequestState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Succeeded | RequestState::Failed | RequestState::TimedOut
        )
    }
}

/// One call waiting for admission
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Unique request id
    pub id: String,
    /// Source on whose behalf the call runs
    pub source_id: String,
    pub priority: Priority,
    /// Queue wait plus execution budget (zero = controller default)
    pub timeout: Duration,
    /// Cancelled when the caller gives up or the request times out
    pub cancel: CancellationToken,
}

impl FetchRequest {
    /// Create a request with the default timeout
    pub fn new(source_id: impl Into<String>, priority: Priority) -> Self {
        let source_id = source_id.into();
        Self {
            id: generate_request_id(&source_id),
            source_id,
            priority,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Tie this request to a caller's cancellation
    pub fn with_parent_cancel(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert!(Priority::Urgent.is_expedited());
        assert!(Priority::High.is_expedited());
        assert!(!Priority::Normal.is_expedited());
        assert!(!Priority::Low.is_expedited());
    }

    #[test]
    fn test_request_defaults() {
        let req = FetchRequest::new("team", Priority::Normal);
        assert_eq!(req.source_id, "team");
        assert_eq!(req.timeout, DEFAULT_REQUEST_TIMEOUT);
        assert!(req.id.starts_with("req-team-"));
    }

    #[test]
    fn test_parent_cancel_propagates() {
        let parent = CancellationToken::new();
        let req = FetchRequest::new("team", Priority::Low).with_parent_cancel(&parent);
        parent.cancel();
        assert!(req.cancel.is_cancelled());
    }

    #[test]
    fn test_terminal_states() {
        assert!(RequestState::TimedOut.is_terminal());
        assert!(RequestState::Succeeded.is_terminal());
        assert!(!RequestState::Executing.is_terminal());
        assert!(!RequestState::Queued.is_terminal());
    }

    #[test]
    fn test_priority_serialization() {
        assert_eq!(serde_json::to_string(&Priority::Urgent).unwrap(), "\"urgent\"");
        let p: Priority = serde_yaml::from_str("high").unwrap();
        assert_eq!(p, Priority::High);
    }
}
