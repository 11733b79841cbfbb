// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Session state commands: list, show, archive, remove

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use recac_core::domain::session::{SessionManager, SessionStatus};
use recac_core::infrastructure::FileSessionManager;

#[derive(Subcommand, Debug)]
pub enum SessionsCommand {
    /// List recorded sessions
    List,

    /// Print one session's state as JSON
    Show { name: String },

    /// Move a session out of the listing
    Archive { name: String },

    /// Delete a session's state file
    Remove { name: String },
}

pub async fn handle_command(command: SessionsCommand, root: Option<PathBuf>) -> Result<()> {
    let sessions = FileSessionManager::new(root.unwrap_or_else(FileSessionManager::default_root));

    match command {
        SessionsCommand::List => {
            let states = sessions.list().await?;
            if states.is_empty() {
                println!("{}", "No sessions".dimmed());
                return Ok(());
            }
            for state in states {
                let status = match state.status {
                    SessionStatus::Running => "running".yellow(),
                    SessionStatus::Completed => "completed".green(),
                    SessionStatus::Failed => "failed".red(),
                    SessionStatus::Cancelled => "cancelled".dimmed(),
                    SessionStatus::NotStarted => "not_started".normal(),
                };
                println!(
                    "{:<24} {:<12} {}",
                    state.name.bold(),
                    status,
                    state.workspace.display()
                );
            }
            Ok(())
        }
        SessionsCommand::Show { name } => {
            let state = sessions
                .load(&name)
                .await?
                .with_context(|| format!("Session '{}' not found", name))?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        SessionsCommand::Archive { name } => {
            sessions.archive(&name).await?;
            println!("{} {}", "✓ Archived".green(), name);
            Ok(())
        }
        SessionsCommand::Remove { name } => {
            sessions.remove(&name).await?;
            println!("{} {}", "✓ Removed".green(), name);
            Ok(())
        }
    }
}
