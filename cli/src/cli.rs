// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Argument tree for `agent-bridge`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{
    ConfigCommand, FeatureCommand, LocksCommand, SessionsCommand, SpecCommand, Verdict,
};

/// Agent Bridge - shared coordination store access for coding agents
#[derive(Parser, Debug)]
#[command(name = "agent-bridge")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "RECAC_CONFIG_PATH",
        value_name = "FILE"
    )]
    pub config: Option<PathBuf>,

    /// Project id (overrides configuration and RECAC_PROJECT_ID)
    #[arg(short, long, global = true, value_name = "ID")]
    pub project: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "RECAC_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Raise a BLOCKER with a reason
    Blocker {
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },

    /// Request a QA pass
    Qa,

    /// Request a manager review
    Manager,

    /// Record a human UI verification verdict for a feature
    Verify {
        id: String,
        #[arg(value_enum)]
        result: Verdict,
        /// Note stored with the verdict
        #[arg(long)]
        feedback: Option<String>,
        /// Workspace holding ui_verification.json
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
    },

    /// Set a non-privileged signal
    Signal { key: String, value: String },

    /// Delete a signal (administrative, project taken from the current directory)
    #[command(name = "clear-signal")]
    ClearSignal { key: String },

    /// Feature list operations
    Feature {
        #[command(subcommand)]
        command: FeatureCommand,
    },

    /// Replace the feature list with JSON read from stdin
    Import,

    /// Project spec operations
    Spec {
        #[command(subcommand)]
        command: SpecCommand,
    },

    /// Inspect and release file locks
    Locks {
        #[command(subcommand)]
        command: LocksCommand,
    },

    /// Remove expired locks, stale signals and excess history
    Cleanup {
        /// Keep sweeping on the configured interval until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Show recent agent observations
    History {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Inspect persisted session state
    Sessions {
        /// Directory holding session state files (default: ~/.recac/sessions)
        #[arg(long, env = "RECAC_SESSIONS_DIR", value_name = "DIR")]
        dir: Option<PathBuf>,
        #[command(subcommand)]
        command: SessionsCommand,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocker_joins_words() {
        let cli = Cli::try_parse_from(["agent-bridge", "blocker", "db", "is", "down"]).unwrap();
        match cli.command {
            Commands::Blocker { message } => assert_eq!(message.join(" "), "db is down"),
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.log_level, "warn");
    }

    #[test]
    fn test_feature_set_parses_status_and_passes() {
        let cli = Cli::try_parse_from([
            "agent-bridge", "feature", "set", "auth", "--status", "done", "--passes", "true",
        ])
        .unwrap();
        match cli.command {
            Commands::Feature {
                command: FeatureCommand::Set { id, status, passes },
            } => {
                assert_eq!(id, "auth");
                assert_eq!(status, "done");
                assert_eq!(passes, Some(true));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_verify_requires_pass_or_fail() {
        assert!(Cli::try_parse_from(["agent-bridge", "verify", "login", "pass"]).is_ok());
        assert!(Cli::try_parse_from(["agent-bridge", "verify", "login", "maybe"]).is_err());
    }

    #[test]
    fn test_locks_release_defaults_to_manager() {
        let cli = Cli::try_parse_from(["agent-bridge", "locks", "release", "/a.go"]).unwrap();
        match cli.command {
            Commands::Locks {
                command: LocksCommand::Release { path, agent },
            } => {
                assert_eq!(path, "/a.go");
                assert_eq!(agent, "MANAGER");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_project_flag() {
        let cli = Cli::try_parse_from(["agent-bridge", "qa", "--project", "todo"]).unwrap();
        assert_eq!(cli.project.as_deref(), Some("todo"));
        assert!(matches!(cli.command, Commands::Qa));
    }

    #[test]
    fn test_clear_signal_name() {
        let cli = Cli::try_parse_from(["agent-bridge", "clear-signal", "BLOCKER"]).unwrap();
        assert!(matches!(cli.command, Commands::ClearSignal { key } if key == "BLOCKER"));
    }
}
