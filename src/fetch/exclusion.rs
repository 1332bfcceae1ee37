//! Author/title/draft exclusion rules

use crate::domain::{FilterConfig, PullRequest};

/// Compiled exclusion rules of a [`FilterConfig`]
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    authors: Vec<String>,
    author_patterns: Vec<String>,
    title_patterns: Vec<String>,
    include_drafts: bool,
}

impl ExclusionFilter {
    pub fn new(filter: &FilterConfig) -> Self {
        let lower = |v: &[String]| -> Vec<String> {
            v.iter().filter(|p| !p.is_empty()).map(|p| p.to_lowercase()).collect()
        };
        Self {
            authors: filter.exclude_authors.clone(),
            author_patterns: lower(&filter.exclude_author_patterns),
            title_patterns: lower(&filter.exclude_title_patterns),
            include_drafts: filter.include_drafts,
        }
    }

    /// Whether `pr` should be dropped
    pub fn excludes(&self, pr: &PullRequest) -> bool {
        if pr.draft && !self.include_drafts {
            return true;
        }
        if self.authors.iter().any(|a| a == &pr.author) {
            return true;
        }
        let author = pr.author.to_lowercase();
        if self.author_patterns.iter().any(|p| author.contains(p.as_str())) {
            return true;
        }
        let title = pr.title.to_lowercase();
        self.title_patterns.iter().any(|p| title.contains(p.as_str()))
    }

    /// Keep only the items not excluded, preserving order
    pub fn apply(&self, items: Vec<PullRequest>) -> Vec<PullRequest> {
        let before = items.len();
        let kept: Vec<PullRequest> = items.into_iter().filter(|pr| !self.excludes(pr)).collect();
        if kept.len() != before {
            tracing::trace!(excluded = before - kept.len(), kept = kept.len(), "Applied exclusion filter");
        }
        kept
    }
}
