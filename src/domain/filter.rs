//! Filter configuration applied to every source fetch

use serde::{Deserialize, Serialize};

/// Default cap on items a single source fetch returns
pub const DEFAULT_MAX_RESULTS: usize = 100;

/// Active filter for one fetch: what to list and what to drop afterwards.
///
/// The serialized form doubles as the filter signature in cache keys, so field
/// order is part of the cache layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// `open`, `closed` or `all`
    pub state: String,

    /// Sort field passed to list endpoints (`created`, `updated`, ...)
    pub sort: String,

    /// `asc` or `desc`
    pub direction: String,

    /// Authors excluded by exact match
    pub exclude_authors: Vec<String>,

    /// Authors excluded when they contain any of these (case-insensitive)
    pub exclude_author_patterns: Vec<String>,

    /// Titles excluded when they contain any of these (case-insensitive)
    pub exclude_title_patterns: Vec<String>,

    /// Keep draft pull requests
    pub include_drafts: bool,

    /// Stop paginating once this many items are collected
    pub max_results: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            state: "open".to_string(),
            sort: "updated".to_string(),
            direction: "desc".to_string(),
            exclude_authors: Vec::new(),
            exclude_author_patterns: vec!["[bot]".to_string()],
            exclude_title_patterns: Vec::new(),
            include_drafts: true,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

impl FilterConfig {
    /// Stable signature of this filter for cache keys
    pub fn signature(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_drafts(mut self, include: bool) -> Self {
        self.include_drafts = include;
        self
    }

    pub fn exclude_author(mut self, author: impl Into<String>) -> Self {
        self.exclude_authors.push(author.into());
        self
    }

    pub fn exclude_title(mut self, pattern: impl Into<String>) -> Self {
        self.exclude_title_patterns.push(pattern.into());
        self
    }
}
