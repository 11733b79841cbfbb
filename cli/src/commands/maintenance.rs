// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Maintenance commands: cleanup, history

use anyhow::{Context, Result};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::context::BridgeContext;

pub async fn cleanup(ctx: &BridgeContext, watch: bool) -> Result<()> {
    let sweeper = ctx.sweeper();

    if watch {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                trigger.cancel();
            }
        });
        info!(interval = ?ctx.config.maintenance.interval, "Sweeping until interrupted");
        sweeper.run_periodic(cancel).await;
        return Ok(());
    }

    let report = sweeper.cleanup().await.context("Cleanup failed")?;
    println!(
        "{} {} expired locks, {} stale signals, {} old observations",
        "✓ Removed".green(),
        report.expired_locks,
        report.stale_signals,
        report.trimmed_observations
    );
    Ok(())
}

pub async fn history(ctx: &BridgeContext, limit: usize) -> Result<()> {
    let observations = ctx.repos.observations.query_history(ctx.project_id(), limit).await?;
    if observations.is_empty() {
        println!("{}", "No history".dimmed());
        return Ok(());
    }
    for observation in observations {
        println!(
            "{} {}",
            observation.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            observation.agent_id.bold()
        );
        println!("{}", observation.content);
        println!();
    }
    Ok(())
}
