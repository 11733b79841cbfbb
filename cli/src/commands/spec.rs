// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Project spec commands: import, show

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

use crate::context::BridgeContext;

#[derive(Subcommand, Debug)]
pub enum SpecCommand {
    /// Store the project spec from a file, or stdin when no file is given
    Import {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Print the stored project spec
    Show,
}

pub async fn handle_command(command: SpecCommand, ctx: &BridgeContext) -> Result<()> {
    match command {
        SpecCommand::Import { file } => {
            let content = match file {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read spec from {:?}", path))?,
                None => {
                    let mut content = String::new();
                    tokio::io::stdin()
                        .read_to_string(&mut content)
                        .await
                        .context("Failed to read spec from stdin")?;
                    content
                }
            };
            ctx.features.save_spec(ctx.project_id(), &content).await?;
            println!("{} ({} bytes)", "✓ Spec saved".green(), content.len());
            Ok(())
        }
        SpecCommand::Show => {
            print!("{}", ctx.features.get_spec(ctx.project_id()).await?);
            Ok(())
        }
    }
}
