//! Source identifiers
//!
//! A source is a saved query against the remote API. The textual form is
//! `kind:value`:
//! - `repos:owner/a,owner/b` - explicit repository list
//! - `org:owner` - every repository of an organization
//! - `label:bug` - label search across the API
//! - `topic:rust` - repositories tagged with a topic
//! - `query:is:pr author:me` - free-text search

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PrwatchError, Result};

/// Parsed source definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum SourceSpec {
    /// Explicit `owner/name` repositories
    Repos(Vec<String>),
    /// All repositories of an organization
    Org(String),
    /// Search by label
    Label(String),
    /// Search by repository topic
    Topic(String),
    /// Free-text search query
    Query(String),
}

impl SourceSpec {
    /// Parse `kind:value` form
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (kind, value) = input
            .split_once(':')
            .ok_or_else(|| PrwatchError::InvalidSource(format!("missing ':' in '{}'", input)))?;
        let value = value.trim();
        if value.is_empty() {
            return Err(PrwatchError::InvalidSource(format!("empty value in '{}'", input)));
        }

        match kind.trim().to_ascii_lowercase().as_str() {
            "repos" | "repo" => {
                let repos: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect();
                for repo in &repos {
                    validate_repo(repo)?;
                }
                if repos.is_empty() {
                    return Err(PrwatchError::InvalidSource(format!("no repositories in '{}'", input)));
                }
                Ok(SourceSpec::Repos(repos))
            }
            "org" => {
                validate_name(value)?;
                Ok(SourceSpec::Org(value.to_string()))
            }
            "label" => Ok(SourceSpec::Label(value.to_string())),
            "topic" => {
                validate_name(value)?;
                Ok(SourceSpec::Topic(value.to_string()))
            }
            "query" | "search" => Ok(SourceSpec::Query(value.to_string())),
            other => Err(PrwatchError::InvalidSource(format!("unknown source kind '{}'", other))),
        }
    }

    /// Short kind name, used in logs and fetcher identities
    pub fn kind(&self) -> &'static str {
        match self {
            SourceSpec::Repos(_) => "repos",
            SourceSpec::Org(_) => "org",
            SourceSpec::Label(_) => "label",
            SourceSpec::Topic(_) => "topic",
            SourceSpec::Query(_) => "query",
        }
    }

    /// Search qualifiers selecting this source's pull requests
    pub fn search_qualifiers(&self) -> String {
        match self {
            SourceSpec::Repos(repos) => repos.iter().map(|r| format!("repo:{}", r)).collect::<Vec<_>>().join(" "),
            SourceSpec::Org(org) => format!("org:{}", org),
            SourceSpec::Label(label) => {
                if label.contains(' ') {
                    format!("label:\"{}\"", label)
                } else {
                    format!("label:{}", label)
                }
            }
            SourceSpec::Topic(topic) => format!("topic:{}", topic),
            SourceSpec::Query(query) => query.clone(),
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Repos(repos) => write!(f, "repos:{}", repos.join(",")),
            SourceSpec::Org(v) => write!(f, "org:{}", v),
            SourceSpec::Label(v) => write!(f, "label:{}", v),
            SourceSpec::Topic(v) => write!(f, "topic:{}", v),
            SourceSpec::Query(v) => write!(f, "query:{}", v),
        }
    }
}

impl FromStr for SourceSpec {
    type Err = PrwatchError;

    fn from_str(s: &str) -> Result<Self> {
        SourceSpec::parse(s)
    }
}

fn validate_name(name: &str) -> Result<()> {
    let ok = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(PrwatchError::InvalidSource(format!("invalid name '{}'", name)))
    }
}

fn validate_repo(repo: &str) -> Result<()> {
    match repo.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            validate_name(owner)?;
            validate_name(name)
        }
        _ => Err(PrwatchError::InvalidSource(format!(
            "repository '{}' is not in owner/name form",
            repo
        ))),
    }
}
