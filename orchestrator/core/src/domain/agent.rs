// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent collaborator: given a prompt, returns text. Provider clients live
//! outside this crate and plug in through [`AgentClient`].

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Rate limit exceeded")]
    RateLimit,
    #[error("Provider error: {0}")]
    Provider(String),
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn send(&self, prompt: &str) -> Result<String, AgentError>;
}
