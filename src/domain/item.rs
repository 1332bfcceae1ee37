//! Pull request items and their enrichment
//!
//! A `PullRequest` is the coarse record a list or search call returns. Per-item
//! detail that the list response lacks is fetched separately and attached as an
//! `EnhancedItem`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One pull request as returned by a source fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    //=== Identity ===
    /// Repository in `owner/name` form
    pub repo: String,

    /// Pull request number within the repository
    pub number: u64,

    //=== Coarse fields ===
    pub title: String,
    pub author: String,
    pub url: String,
    pub state: String,
    pub draft: bool,
    pub labels: Vec<String>,

    /// Head commit, needed to look up check runs
    pub head_sha: Option<String>,

    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,

    //=== Enrichment ===
    /// Per-item detail, present once enriched (or when the optimized query served it)
    #[serde(default)]
    pub enhanced: Option<EnhancedItem>,
}

impl PullRequest {
    /// Create a bare pull request record
    pub fn new(repo: impl Into<String>, number: u64, title: impl Into<String>, author: impl Into<String>) -> Self {
        let repo = repo.into();
        let url = format!("https://github.com/{}/pull/{}", repo, number);
        Self {
            repo,
            number,
            title: title.into(),
            author: author.into(),
            url,
            state: "open".to_string(),
            draft: false,
            labels: Vec::new(),
            head_sha: None,
            created_at: None,
            updated_at: None,
            enhanced: None,
        }
    }

    /// Key identifying this item across sources (`owner/name#number`)
    pub fn item_key(&self) -> String {
        format!("{}#{}", self.repo, self.number)
    }

    /// Mark as draft
    pub fn with_draft(mut self, draft: bool) -> Self {
        self.draft = draft;
        self
    }

    /// Attach labels
    pub fn with_labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Whether per-item detail has been attached
    pub fn is_enhanced(&self) -> bool {
        self.enhanced.is_some()
    }
}

/// Per-item detail not present in list responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedItem {
    pub comments: u64,
    pub review_comments: u64,
    pub review_status: ReviewStatus,
    pub check_status: CheckStatus,
    pub merge_state: MergeState,
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
    pub enhanced_at: DateTime<Utc>,
}

impl Default for EnhancedItem {
    fn default() -> Self {
        Self {
            comments: 0,
            review_comments: 0,
            review_status: ReviewStatus::None,
            check_status: CheckStatus::Unknown,
            merge_state: MergeState::Unknown,
            additions: 0,
            deletions: 0,
            changed_files: 0,
            enhanced_at: Utc::now(),
        }
    }
}

/// Aggregate review decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// No reviews yet
    None,
    Pending,
    Approved,
    ChangesRequested,
    Commented,
}

impl ReviewStatus {
    /// Derive the aggregate status from individual review states, latest last.
    ///
    /// Any outstanding change request wins; otherwise an approval; otherwise
    /// comments; an empty list means no reviews.
    pub fn from_review_states<'a>(states: impl IntoIterator<Item = &'a str>) -> Self {
        let mut status = ReviewStatus::None;
        for state in states {
            status = match (status, state.to_ascii_uppercase().as_str()) {
                (_, "CHANGES_REQUESTED") => ReviewStatus::ChangesRequested,
                (ReviewStatus::ChangesRequested, "APPROVED") => ReviewStatus::Approved,
                (ReviewStatus::ChangesRequested, _) => ReviewStatus::ChangesRequested,
                (_, "APPROVED") => ReviewStatus::Approved,
                (ReviewStatus::Approved, _) => ReviewStatus::Approved,
                (_, "COMMENTED") => ReviewStatus::Commented,
                (ReviewStatus::None, "PENDING") => ReviewStatus::Pending,
                (current, _) => current,
            };
        }
        status
    }

    /// Map a GraphQL `reviewDecision` value
    pub fn from_review_decision(decision: Option<&str>) -> Self {
        match decision {
            Some("APPROVED") => ReviewStatus::Approved,
            Some("CHANGES_REQUESTED") => ReviewStatus::ChangesRequested,
            Some("REVIEW_REQUIRED") => ReviewStatus::Pending,
            _ => ReviewStatus::None,
        }
    }
}

/// Aggregate CI check state for the head commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Unknown,
    Pending,
    Success,
    Failure,
}

impl CheckStatus {
    /// Combine check-run `(status, conclusion)` pairs into one state
    pub fn from_check_runs<'a>(runs: impl IntoIterator<Item = (&'a str, Option<&'a str>)>) -> Self {
        let mut seen = false;
        let mut pending = false;
        for (status, conclusion) in runs {
            seen = true;
            if status != "completed" {
                pending = true;
                continue;
            }
            match conclusion {
                Some("success") | Some("neutral") | Some("skipped") => {}
                _ => return CheckStatus::Failure,
            }
        }
        match (seen, pending) {
            (false, _) => CheckStatus::Unknown,
            (true, true) => CheckStatus::Pending,
            (true, false) => CheckStatus::Success,
        }
    }

    /// Map a GraphQL `statusCheckRollup.state` value
    pub fn from_rollup_state(state: Option<&str>) -> Self {
        match state {
            Some("SUCCESS") => CheckStatus::Success,
            Some("FAILURE") | Some("ERROR") => CheckStatus::Failure,
            Some("PENDING") | Some("EXPECTED") => CheckStatus::Pending,
            _ => CheckStatus::Unknown,
        }
    }
}

/// Mergeability as reported by the remote API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeState {
    Unknown,
    Clean,
    Blocked,
    Behind,
    Dirty,
    Unstable,
    Draft,
}

impl MergeState {
    /// Parse `mergeable_state` (REST) or `mergeStateStatus` (GraphQL)
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.to_ascii_lowercase()).as_deref() {
            Some("clean") | Some("has_hooks") => MergeState::Clean,
            Some("blocked") => MergeState::Blocked,
            Some("behind") => MergeState::Behind,
            Some("dirty") => MergeState::Dirty,
            Some("unstable") => MergeState::Unstable,
            Some("draft") => MergeState::Draft,
            _ => MergeState::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_key() {
        let pr = PullRequest::new("rust-lang/rust", 42, "Fix it", "alice");
        assert_eq!(pr.item_key(), "rust-lang/rust#42");
        assert_eq!(pr.url, "https://github.com/rust-lang/rust/pull/42");
        assert!(!pr.is_enhanced());
    }

    #[test]
    fn test_review_status_changes_requested_wins() {
        let status = ReviewStatus::from_review_states(["APPROVED", "CHANGES_REQUESTED", "COMMENTED"]);
        assert_eq!(status, ReviewStatus::ChangesRequested);
    }

    #[test]
    fn test_review_status_later_approval_clears_request() {
        let status = ReviewStatus::from_review_states(["CHANGES_REQUESTED", "APPROVED"]);
        assert_eq!(status, ReviewStatus::Approved);
    }

    #[test]
    fn test_review_status_empty() {
        assert_eq!(ReviewStatus::from_review_states([]), ReviewStatus::None);
        assert_eq!(ReviewStatus::from_review_states(["COMMENTED"]), ReviewStatus::Commented);
    }

    #[test]
    fn test_check_status_from_runs() {
        assert_eq!(CheckStatus::from_check_runs([]), CheckStatus::Unknown);
        assert_eq!(
            CheckStatus::from_check_runs([("completed", Some("success")), ("in_progress", None)]),
            CheckStatus::Pending
        );
        assert_eq!(
            CheckStatus::from_check_runs([("completed", Some("success")), ("completed", Some("failure"))]),
            CheckStatus::Failure
        );
        assert_eq!(
            CheckStatus::from_check_runs([("completed", Some("success")), ("completed", Some("skipped"))]),
            CheckStatus::Success
        );
    }

    #[test]
    fn test_merge_state_parse() {
        assert_eq!(MergeState::parse(Some("clean")), MergeState::Clean);
        assert_eq!(MergeState::parse(Some("BEHIND")), MergeState::Behind);
        assert_eq!(MergeState::parse(None), MergeState::Unknown);
    }

    #[test]
    fn test_serialization_keeps_enhancement() {
        let mut pr = PullRequest::new("a/b", 1, "t", "u");
        pr.enhanced = Some(EnhancedItem {
            additions: 10,
            ..Default::default()
        });
        let json = serde_json::to_string(&pr).unwrap();
        let restored: PullRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.enhanced.unwrap().additions, 10);
    }
}
