//! Events emitted by the poll service

use serde::{Deserialize, Serialize};

use crate::domain::PullRequest;

/// Progress of a source, in the order it happens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceEvent {
    /// A refresh passed the scheduler gate
    RefreshStarted { source_id: String },
    /// Fresh list for the source
    Updated { source_id: String, items: Vec<PullRequest> },
    /// One item of the last list gained detail
    Enhanced {
        source_id: String,
        index: usize,
        item: PullRequest,
    },
    /// The refresh failed as a whole
    Failed { source_id: String, error: String },
}

impl SourceEvent {
    pub fn source_id(&self) -> &str {
        match self {
            SourceEvent::RefreshStarted { source_id }
            | SourceEvent::Updated { source_id, .. }
            | SourceEvent::Enhanced { source_id, .. }
            | SourceEvent::Failed { source_id, .. } => source_id,
        }
    }
}
