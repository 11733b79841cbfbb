// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Signal Coordination Channel
//!
//! Wraps the raw signal store with the agent-facing privilege gate and the
//! orchestrator's helpers. Only [`SignalChannel::set_agent_signal`] is gated;
//! everything else here is the internal path.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::domain::clock::Clock;
use crate::domain::repository::{RepositoryError, SignalRepository};
use crate::domain::signal::{
    self, Signal, BLOCKER, TRIGGER_MANAGER, TRIGGER_QA, TRUE_VALUE, UI_VERIFICATION_MARKER,
};

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("signal '{0}' is privileged and cannot be set via agent-bridge")]
    Privileged(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone)]
pub struct SignalChannel {
    signals: Arc<dyn SignalRepository>,
    clock: Arc<dyn Clock>,
}

impl SignalChannel {
    pub fn new(signals: Arc<dyn SignalRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { signals, clock }
    }

    /// Agent-facing setter. Rejects privileged keys before touching the store.
    pub async fn set_agent_signal(&self, project_id: &str, key: &str, value: &str) -> Result<(), SignalError> {
        if signal::is_privileged(key) {
            return Err(SignalError::Privileged(key.to_string()));
        }
        self.set_signal(project_id, key, value).await
    }

    pub async fn set_signal(&self, project_id: &str, key: &str, value: &str) -> Result<(), SignalError> {
        self.signals.set_signal(project_id, key, value, self.clock.now()).await?;
        info!(project_id, key, "Signal set");
        Ok(())
    }

    /// Empty string when the signal is absent.
    pub async fn get_signal(&self, project_id: &str, key: &str) -> Result<String, SignalError> {
        Ok(self.signals.get_signal(project_id, key).await?.unwrap_or_default())
    }

    pub async fn delete_signal(&self, project_id: &str, key: &str) -> Result<(), SignalError> {
        self.signals.delete_signal(project_id, key).await?;
        info!(project_id, key, "Signal cleared");
        Ok(())
    }

    pub async fn is_set(&self, project_id: &str, key: &str) -> Result<bool, SignalError> {
        Ok(signal::is_raised(&self.get_signal(project_id, key).await?))
    }

    /// Current blocker message, if any.
    pub async fn blocker(&self, project_id: &str) -> Result<Option<String>, SignalError> {
        let value = self.get_signal(project_id, BLOCKER).await?;
        Ok(if value.is_empty() { None } else { Some(value) })
    }

    pub async fn set_blocker(&self, project_id: &str, message: &str) -> Result<(), SignalError> {
        self.set_signal(project_id, BLOCKER, message).await
    }

    pub async fn request_qa(&self, project_id: &str) -> Result<(), SignalError> {
        self.set_signal(project_id, TRIGGER_QA, TRUE_VALUE).await
    }

    pub async fn request_manager_review(&self, project_id: &str) -> Result<(), SignalError> {
        self.set_signal(project_id, TRIGGER_MANAGER, TRUE_VALUE).await
    }

    /// Delete `BLOCKER` if it was raised for UI verification. Returns whether
    /// anything was cleared.
    pub async fn clear_ui_verification_blocker(&self, project_id: &str) -> Result<bool, SignalError> {
        match self.blocker(project_id).await? {
            Some(message) if message.contains(UI_VERIFICATION_MARKER) => {
                self.delete_signal(project_id, BLOCKER).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub async fn list(&self, project_id: &str) -> Result<Vec<Signal>, SignalError> {
        Ok(self.signals.list_signals(project_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::SystemClock;
    use crate::domain::signal::{COMPLETED, PRIVILEGED_KEYS, QA_PASSED};
    use crate::infrastructure::repositories::InMemoryCoordinationStore;

    fn channel() -> SignalChannel {
        SignalChannel::new(Arc::new(InMemoryCoordinationStore::new()), Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_privileged_keys_rejected_on_agent_path() {
        let signals = channel();
        for key in PRIVILEGED_KEYS {
            let err = signals.set_agent_signal("p", key, "true").await.unwrap_err();
            assert!(matches!(err, SignalError::Privileged(_)));
            assert_eq!(signals.get_signal("p", key).await.unwrap(), "");
        }

        signals.set_agent_signal("p", "CUSTOM", "x").await.unwrap();
        assert_eq!(signals.get_signal("p", "CUSTOM").await.unwrap(), "x");
    }

    #[tokio::test]
    async fn test_internal_path_bypasses_gate() {
        let signals = channel();
        signals.set_signal("p", QA_PASSED, "true").await.unwrap();
        assert!(signals.is_set("p", QA_PASSED).await.unwrap());
        assert!(!signals.is_set("p", COMPLETED).await.unwrap());

        signals.request_manager_review("p").await.unwrap();
        assert!(signals.is_set("p", TRIGGER_MANAGER).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_signal_is_empty_string() {
        assert_eq!(channel().get_signal("nope", "BLOCKER").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_ui_blocker_cleared_only_when_marked() {
        let signals = channel();
        signals.set_blocker("p", "Database is down").await.unwrap();
        assert!(!signals.clear_ui_verification_blocker("p").await.unwrap());
        assert!(signals.blocker("p").await.unwrap().is_some());

        signals
            .set_blocker("p", "UI Verification Required: check the login page")
            .await
            .unwrap();
        assert!(signals.clear_ui_verification_blocker("p").await.unwrap());
        assert!(signals.blocker("p").await.unwrap().is_none());
    }
}
