// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Container Runner Contract
//!
//! The session loop drives one long-lived container per session: the image is
//! pulled and started once, the workspace is bind-mounted, and every command the
//! agent proposes runs through [`ContainerRunner::exec`].
//!
//! The concrete Docker implementation lives in `crate::infrastructure::runtime`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Host directory mounted at [`ContainerSpec::workdir`].
    pub workspace: PathBuf,
    pub workdir: String,
    pub env: HashMap<String, String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            workspace: workspace.into(),
            workdir: "/workspace".to_string(),
            env: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i64,
    /// Interleaved stdout and stderr.
    pub output: String,
}

impl ExecResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to pull image: {0}")]
    PullFailed(String),
    #[error("Failed to create container: {0}")]
    CreateFailed(String),
    #[error("Failed to execute command: {0}")]
    ExecutionFailed(String),
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
    #[error("Failed to stop container: {0}")]
    TerminationFailed(String),
    #[error("Container not found: {0}")]
    ContainerNotFound(String),
}

impl RuntimeError {
    /// The container or the daemon is gone; nothing further can run in this session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RuntimeError::Unavailable(_) | RuntimeError::ContainerNotFound(_))
    }
}

#[async_trait]
pub trait ContainerRunner: Send + Sync {
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerId, RuntimeError>;
    async fn start(&self, id: &ContainerId) -> Result<(), RuntimeError>;
    async fn exec(&self, id: &ContainerId, command: &[String], timeout: Duration) -> Result<ExecResult, RuntimeError>;
    async fn stop(&self, id: &ContainerId) -> Result<(), RuntimeError>;
    async fn remove(&self, id: &ContainerId) -> Result<(), RuntimeError>;
}
