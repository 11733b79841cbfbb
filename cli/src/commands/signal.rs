// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Signal commands: blocker, qa, manager, signal, clear-signal, verify

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use std::path::Path;

use recac_core::application::ui_verification;
use recac_core::domain::signal::BLOCKER;

use crate::context::BridgeContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Verdict {
    Pass,
    Fail,
}

pub async fn blocker(ctx: &BridgeContext, message: &[String]) -> Result<()> {
    let message = message.join(" ");
    ctx.signals.set_agent_signal(ctx.project_id(), BLOCKER, &message).await?;
    println!("{} {}", "Blocker raised:".yellow(), message);
    Ok(())
}

pub async fn qa(ctx: &BridgeContext) -> Result<()> {
    ctx.signals.request_qa(ctx.project_id()).await?;
    println!("{}", "✓ QA requested".green());
    Ok(())
}

pub async fn manager(ctx: &BridgeContext) -> Result<()> {
    ctx.signals.request_manager_review(ctx.project_id()).await?;
    println!("{}", "✓ Manager review requested".green());
    Ok(())
}

pub async fn set(ctx: &BridgeContext, key: &str, value: &str) -> Result<()> {
    ctx.signals.set_agent_signal(ctx.project_id(), key, value).await?;
    println!("{} {}={}", "✓ Signal set:".green(), key, value);
    Ok(())
}

/// Administrative delete. Bypasses the privilege gate.
pub async fn clear(ctx: &BridgeContext, project_id: &str, key: &str) -> Result<()> {
    ctx.signals.delete_signal(project_id, key).await?;
    println!("{} {} ({})", "✓ Signal cleared:".green(), key, project_id);
    Ok(())
}

pub async fn verify(
    ctx: &BridgeContext,
    feature_id: &str,
    verdict: Verdict,
    feedback: Option<&str>,
    workspace: &Path,
) -> Result<()> {
    let approved = verdict == Verdict::Pass;
    let outcome = ui_verification::verify_feature(
        workspace,
        ctx.project_id(),
        feature_id,
        approved,
        feedback,
        &ctx.signals,
    )
    .await?;

    let label = if approved { "approved".green() } else { "rejected".red() };
    println!("Feature {} {}", feature_id.bold(), label);
    if outcome.blocker_cleared {
        println!("{}", "✓ All UI verifications resolved; blocker cleared".green());
    } else if outcome.remaining_pending > 0 {
        println!("{} verification(s) still pending", outcome.remaining_pending);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recac_core::application::Repositories;
    use recac_core::domain::config::CoordinationConfig;

    fn context() -> BridgeContext {
        let mut config = CoordinationConfig::default();
        config.project_id = "todo".to_string();
        BridgeContext::from_parts(config, Repositories::in_memory())
    }

    #[tokio::test]
    async fn test_signal_rejects_privileged_key() {
        let ctx = context();
        let err = set(&ctx, "COMPLETED", "true").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "signal 'COMPLETED' is privileged and cannot be set via agent-bridge"
        );
    }

    #[tokio::test]
    async fn test_clear_bypasses_gate() {
        let ctx = context();
        qa(&ctx).await.unwrap();
        assert_eq!(ctx.signals.get_signal("todo", "TRIGGER_QA").await.unwrap(), "true");

        clear(&ctx, "todo", "TRIGGER_QA").await.unwrap();
        assert_eq!(ctx.signals.get_signal("todo", "TRIGGER_QA").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_blocker_joins_message() {
        let ctx = context();
        blocker(&ctx, &["need".to_string(), "API key".to_string()]).await.unwrap();
        assert_eq!(ctx.signals.get_signal("todo", BLOCKER).await.unwrap(), "need API key");
    }
}
