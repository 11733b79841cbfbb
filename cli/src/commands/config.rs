// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use recac_core::domain::config::CoordinationConfig;

use crate::context::load_config;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
    project: Option<String>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, project, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
    }
}

fn show(config_override: Option<PathBuf>, project: Option<String>, show_paths: bool) -> Result<()> {
    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. RECAC_CONFIG_PATH: {}",
            std::env::var("RECAC_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./recac-config.yaml");
        println!("  4. ~/.recac/config.yaml");
        match CoordinationConfig::discover_config() {
            Some(found) if config_override.is_none() => println!("  Using: {}", found.display()),
            _ => {}
        }
        println!();
    }

    let config = load_config(config_override, project)?;
    println!("{}", "Current configuration:".bold());
    print!("{}", serde_yaml::to_string(&config).context("Failed to render configuration")?);
    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");
    load_config(config_path, None)?;
    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}
