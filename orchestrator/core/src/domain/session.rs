// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Session State
//!
//! A session is one agent + container pairing working a workspace. Its
//! persisted state is owned by a [`SessionManager`] collaborator; the session
//! loop only reads and writes it. Loop counters (current iteration, retry
//! budgets) are kept in memory by the loop and never persisted.
//!
//! ```text
//! NotStarted -> Running -> { Completed, Failed, Cancelled }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    NotStarted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub name: String,
    #[serde(default)]
    pub pid: Option<u32>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    pub workspace: PathBuf,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default, rename = "type")]
    pub session_type: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub container_id: Option<String>,
}

impl SessionState {
    pub fn new(name: impl Into<String>, workspace: impl Into<PathBuf>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            pid: Some(std::process::id()),
            start_time: now,
            end_time: None,
            command: Vec::new(),
            log_file: None,
            workspace: workspace.into(),
            status: SessionStatus::NotStarted,
            session_type: "agent".to_string(),
            goal: String::new(),
            error: None,
            container_id: None,
        }
    }

    pub fn finish(&mut self, status: SessionStatus, error: Option<String>, now: DateTime<Utc>) {
        self.status = status;
        self.error = error;
        self.end_time = Some(now);
    }
}

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait SessionManager: Send + Sync {
    async fn save(&self, state: &SessionState) -> Result<(), SessionStoreError>;
    async fn load(&self, name: &str) -> Result<Option<SessionState>, SessionStoreError>;
    async fn list(&self) -> Result<Vec<SessionState>, SessionStoreError>;
    async fn archive(&self, name: &str) -> Result<(), SessionStoreError>;
    async fn remove(&self, name: &str) -> Result<(), SessionStoreError>;
}

/// Progress callbacks from the session loop. Every method defaults to a no-op.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    async fn on_iteration_start(&self, _iteration: u32, _feature_id: &str) {}
    async fn on_command_output(&self, _iteration: u32, _command: &str, _exit_code: i64, _output: &str) {}
    async fn on_iteration_complete(&self, _iteration: u32, _feature_id: &str) {}
    async fn on_iteration_fail(&self, _iteration: u32, _feature_id: &str, _error: &str) {}
}
