// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Lock commands: list, release

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use recac_core::domain::lock::MANAGER_IDENTITY;

use crate::context::BridgeContext;

#[derive(Subcommand, Debug)]
pub enum LocksCommand {
    /// List unexpired locks of the project
    List,

    /// Release a lock. MANAGER releases regardless of owner
    Release {
        path: String,
        #[arg(long, default_value = MANAGER_IDENTITY)]
        agent: String,
    },
}

pub async fn handle_command(command: LocksCommand, ctx: &BridgeContext) -> Result<()> {
    match command {
        LocksCommand::List => {
            let locks = ctx.locks.active_locks(ctx.project_id()).await?;
            if locks.is_empty() {
                println!("{}", "No active locks".dimmed());
                return Ok(());
            }
            println!("{:<40} {:<20} {}", "PATH".bold(), "OWNER".bold(), "EXPIRES".bold());
            for lock in locks {
                println!(
                    "{:<40} {:<20} {}",
                    lock.path,
                    lock.agent_id,
                    lock.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            Ok(())
        }
        LocksCommand::Release { path, agent } => {
            ctx.locks.release(ctx.project_id(), &path, &agent).await?;
            println!("{} {} (as {})", "✓ Released".green(), path, agent);
            Ok(())
        }
    }
}
