//! CLI module for prwatch - command-line interface and subcommands.
//!
//! Provides one-shot fetches, the long-running watch mode and cache/quota
//! inspection.

pub mod commands;

pub use commands::Cli;
