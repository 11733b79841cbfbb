// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Service wiring shared by every command: configuration, store handles and
//! the application services built on them.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use recac_core::application::{FeatureService, LeaseLockManager, MaintenanceSweeper, Repositories, SignalChannel};
use recac_core::domain::clock::{Clock, SystemClock};
use recac_core::domain::config::CoordinationConfig;

pub struct BridgeContext {
    pub config: CoordinationConfig,
    pub repos: Repositories,
    pub signals: SignalChannel,
    pub features: FeatureService,
    pub locks: LeaseLockManager,
    clock: Arc<dyn Clock>,
}

impl BridgeContext {
    /// Load configuration (file, then environment, then `project` flag) and
    /// open the store.
    pub async fn open(config_path: Option<PathBuf>, project: Option<String>) -> Result<Self> {
        let config = load_config(config_path, project)?;
        let repos = Repositories::open(&config.database)
            .await
            .context("Failed to open coordination store")?;
        debug!(project_id = %config.project_id, backend = ?config.database.backend, "Store opened");
        Ok(Self::from_parts(config, repos))
    }

    pub fn from_parts(config: CoordinationConfig, repos: Repositories) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let signals = SignalChannel::new(repos.signals.clone(), clock.clone());
        let features = FeatureService::new(
            repos.features.clone(),
            repos.specs.clone(),
            signals.clone(),
            clock.clone(),
        );
        let locks = LeaseLockManager::new(repos.locks.clone(), clock.clone(), config.locks.policy);

        Self {
            config,
            repos,
            signals,
            features,
            locks,
            clock,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.config.project_id
    }

    pub fn sweeper(&self) -> MaintenanceSweeper {
        MaintenanceSweeper::new(
            self.repos.locks.clone(),
            self.repos.signals.clone(),
            self.repos.observations.clone(),
            self.clock.clone(),
            self.config.maintenance,
        )
    }

    pub async fn close(self) {
        self.repos.close().await;
    }
}

pub fn load_config(config_path: Option<PathBuf>, project: Option<String>) -> Result<CoordinationConfig> {
    let mut config = CoordinationConfig::load_or_default(config_path).context("Failed to load configuration")?;
    if let Some(project) = project {
        config.project_id = project;
    }
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

/// Project id derived from the working directory name.
pub fn project_from_cwd() -> Result<String> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    cwd.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("Cannot derive a project id from {}", cwd.display()))
}
