// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # agent-bridge
//!
//! Command line used by coding agents (and the people supervising them) to
//! reach the shared coordination store.
//!
//! ## Commands
//!
//! - `agent-bridge blocker|qa|manager|signal|clear-signal|verify` - Signals
//! - `agent-bridge feature list|set`, `agent-bridge import` - Feature list
//! - `agent-bridge spec import|show` - Project spec
//! - `agent-bridge locks list|release`, `agent-bridge cleanup` - Maintenance
//! - `agent-bridge history`, `agent-bridge sessions ...` - Inspection
//!
//! Stdout carries command output only; logs go to stderr. Any failure prints
//! one `Error:` line to stderr and exits with status 1.

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use recac_cli::cli::{Cli, Commands};
use recac_cli::commands;
use recac_cli::context::{project_from_cwd, BridgeContext};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_level) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let Cli {
        config,
        project,
        command,
        ..
    } = cli;

    // Commands that never touch the store
    let command = match command {
        Commands::Config { command } => return commands::config::handle_command(command, config, project).await,
        Commands::Sessions { dir, command } => return commands::sessions::handle_command(command, dir).await,
        other => other,
    };

    let ctx = BridgeContext::open(config, project).await?;
    let result = dispatch(&ctx, command).await;
    ctx.close().await;
    result
}

async fn dispatch(ctx: &BridgeContext, command: Commands) -> Result<()> {
    match command {
        Commands::Blocker { message } => commands::signal::blocker(ctx, &message).await,
        Commands::Qa => commands::signal::qa(ctx).await,
        Commands::Manager => commands::signal::manager(ctx).await,
        Commands::Verify {
            id,
            result,
            feedback,
            workspace,
        } => commands::signal::verify(ctx, &id, result, feedback.as_deref(), &workspace).await,
        Commands::Signal { key, value } => commands::signal::set(ctx, &key, &value).await,
        Commands::ClearSignal { key } => {
            let project_id = project_from_cwd()?;
            commands::signal::clear(ctx, &project_id, &key).await
        }
        Commands::Feature { command } => commands::feature::handle_command(command, ctx).await,
        Commands::Import => commands::feature::import(ctx, tokio::io::stdin()).await,
        Commands::Spec { command } => commands::spec::handle_command(command, ctx).await,
        Commands::Locks { command } => commands::locks::handle_command(command, ctx).await,
        Commands::Cleanup { watch } => commands::maintenance::cleanup(ctx, watch).await,
        Commands::History { limit } => commands::maintenance::history(ctx, limit).await,
        Commands::Config { .. } | Commands::Sessions { .. } => Ok(()),
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
