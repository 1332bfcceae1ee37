//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - fetch: one-shot fetch of a source spec
//! - watch: poll every configured source until interrupted
//! - cache: inspect or clean the persistent cache
//! - quota: show the remaining API quota

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// prwatch - quota-aware pull request polling
#[derive(Parser, Debug)]
#[command(name = "prwatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch one source once and print its pull requests
    Fetch {
        /// Source spec: repos:o/a,o/b | org:o | label:l | topic:t | query:<text>
        spec: String,

        /// Skip per-item detail enrichment
        #[arg(long)]
        no_enrich: bool,

        /// Ignore cached results
        #[arg(long)]
        fresh: bool,

        /// Stop after this many items
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Poll every configured source until Ctrl-C
    Watch,

    /// Persistent cache maintenance
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Show the remaining API quota
    Quota,
}

/// Cache subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CacheCommands {
    /// Entry count and size on disk
    Stats,

    /// Delete expired entries
    Clean,

    /// Delete every entry
    Clear,
}
