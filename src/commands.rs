//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line arguments,
//! and a `Commands` enum that represents the available subcommands and their
//! options.
//!
//! # Examples
//!
//! Parsing command-line arguments:
//!
//! ```no_run
//! use clap::Parser;
//! use hindsight::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Commands::Recall { session, query, .. } => {
//!         // Recall evidence for `query` in `session`
//!     }
//!     _ => {}
//! }
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Path to `config.yaml`. Defaults to the per-platform config directory.
    #[arg(long, short = 'c', global = true, env = "HINDSIGHT_CONFIG")]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default configuration file.
    Init,

    /// Start a new session and print its id.
    Start,

    /// List sessions, newest first.
    #[clap(name = "sessions", alias = "ls")]
    Sessions {
        #[arg(long)]
        json: bool,
    },

    /// Show every message of a session in order.
    History {
        session: String,

        #[arg(long)]
        json: bool,
    },

    /// Log one exchange and index both messages.
    #[clap(name = "remember", alias = "r")]
    Remember {
        #[arg(long, short = 's')]
        session: String,

        #[arg(long, short = 't')]
        turn: i32,

        user: String,

        assistant: String,
    },

    /// Record the final turn count of a session.
    Close {
        #[arg(long, short = 's')]
        session: String,

        #[arg(long)]
        turns: i32,
    },

    /// Print the evidence recalled for a query.
    Recall {
        #[arg(long, short = 's')]
        session: String,

        query: String,

        /// Overrides `retrieval.top_k`.
        #[arg(long)]
        top_k: Option<usize>,

        /// Overrides `retrieval.similarity_threshold`.
        #[arg(long)]
        threshold: Option<f32>,

        /// Overrides `retrieval.recent_n`.
        #[arg(long)]
        recent_n: Option<usize>,

        /// Print the recalled rows as JSON instead of evidence text.
        #[arg(long)]
        json: bool,
    },

    /// Check the index against the log and repair drift.
    Rebuild {
        /// Rebuild even if the counts agree.
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remember() {
        let cli = Cli::try_parse_from([
            "hindsight", "remember", "--session", "42", "--turn", "3", "hi", "hello",
        ])
        .unwrap();
        match cli.command {
            Commands::Remember {
                session,
                turn,
                user,
                assistant,
            } => {
                assert_eq!(session, "42");
                assert_eq!(turn, 3);
                assert_eq!(user, "hi");
                assert_eq!(assistant, "hello");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_recall_overrides_and_global_config() {
        let cli = Cli::try_parse_from([
            "hindsight",
            "recall",
            "-s",
            "42",
            "what is my name",
            "--top-k",
            "3",
            "--threshold",
            "0.3",
            "--json",
            "--config",
            "/tmp/hs.yaml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/hs.yaml")));
        match cli.command {
            Commands::Recall {
                top_k,
                threshold,
                recent_n,
                json,
                ..
            } => {
                assert_eq!(top_k, Some(3));
                assert_eq!(threshold, Some(0.3));
                assert_eq!(recent_n, None);
                assert!(json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_remember_requires_turn() {
        assert!(Cli::try_parse_from(["hindsight", "remember", "-s", "1", "a", "b"]).is_err());
    }
}
