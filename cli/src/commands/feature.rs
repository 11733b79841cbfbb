// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Feature commands: list, set, import

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use tokio::io::{AsyncRead, AsyncReadExt};

use recac_core::domain::feature::FeatureStatus;

use crate::context::BridgeContext;

/// Printed by `feature list` when the project has no feature list yet.
pub const EMPTY_FEATURE_LIST: &str = r#"{"features":[]}"#;

#[derive(Subcommand, Debug)]
pub enum FeatureCommand {
    /// Print the project's feature list JSON
    List,

    /// Update one feature's status and passes flag
    Set {
        id: String,
        #[arg(long)]
        status: String,
        #[arg(long, value_name = "true|false")]
        passes: Option<bool>,
    },
}

pub async fn handle_command(command: FeatureCommand, ctx: &BridgeContext) -> Result<()> {
    match command {
        FeatureCommand::List => {
            println!("{}", list(ctx).await?);
            Ok(())
        }
        FeatureCommand::Set { id, status, passes } => set(ctx, &id, &status, passes.unwrap_or(false)).await,
    }
}

pub async fn list(ctx: &BridgeContext) -> Result<String> {
    let content = ctx.features.get_features(ctx.project_id()).await?;
    if content.trim().is_empty() {
        Ok(EMPTY_FEATURE_LIST.to_string())
    } else {
        Ok(content)
    }
}

pub async fn set(ctx: &BridgeContext, id: &str, status: &str, passes: bool) -> Result<()> {
    let status = FeatureStatus::from(status);
    let list = ctx
        .features
        .update_feature_status(ctx.project_id(), id, &status, passes)
        .await?;

    println!("{} {} -> {} (passes: {})", "✓ Feature".green(), id.bold(), status, passes);
    if list.all_complete() {
        println!("{}", "All features done and passing".green().bold());
    }
    Ok(())
}

/// Replace the feature list with the JSON document read from `input`.
pub async fn import<R: AsyncRead + Unpin>(ctx: &BridgeContext, mut input: R) -> Result<()> {
    let mut content = String::new();
    input
        .read_to_string(&mut content)
        .await
        .context("Failed to read feature list from stdin")?;

    let list = ctx.features.save_features(ctx.project_id(), &content).await?;
    println!("{} {} features", "✓ Imported".green(), list.features.len());
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
    async fn test_list_falls_back_to_empty_json() {
        let ctx = context();
        assert_eq!(list(&ctx).await.unwrap(), EMPTY_FEATURE_LIST);
    }

    #[tokio::test]
    async fn test_import_then_set() {
        let ctx = context();
        let doc = r#"{"features":[{"id":"auth","status":"pending","passes":false}]}"#;
        import(&ctx, doc.as_bytes()).await.unwrap();
        assert_eq!(list(&ctx).await.unwrap(), doc);

        set(&ctx, "auth", "Done", true).await.unwrap();
        let stored = ctx.features.load_feature_list("todo").await.unwrap().unwrap();
        assert!(stored.features[0].is_complete());
        assert_eq!(ctx.signals.get_signal("todo", "COMPLETED").await.unwrap(), "true");
    }

    #[tokio::test]
    async fn test_import_rejects_malformed_json() {
        let ctx = context();
        let err = import(&ctx, "[oops".as_bytes()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("todo"));
        assert_eq!(list(&ctx).await.unwrap(), EMPTY_FEATURE_LIST);
    }

    #[tokio::test]
    async fn test_set_unknown_feature_fails() {
        let ctx = context();
        import(&ctx, r#"{"features":[]}"#.as_bytes()).await.unwrap();
        assert!(set(&ctx, "ghost", "done", true).await.is_err());
    }
}
