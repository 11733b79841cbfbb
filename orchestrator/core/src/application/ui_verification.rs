// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Human UI verification records.
//!
//! Agents that need a person to look at a UI append a `pending_human` request
//! to `ui_verification.json` in the workspace and raise a `BLOCKER` mentioning
//! "UI Verification Required". Resolving the last pending request clears that
//! blocker.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::application::signal_channel::{SignalChannel, SignalError};

pub const UI_VERIFICATION_FILE: &str = "ui_verification.json";

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("no UI verification request for feature '{0}'")]
    RequestNotFound(String),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Signal(#[from] SignalError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    PendingHuman,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub feature_id: String,
    #[serde(default)]
    pub instruction: String,
    pub status: VerificationStatus,
    #[serde(default)]
    pub feedback: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiVerificationFile {
    #[serde(default)]
    pub requests: Vec<VerificationRequest>,
}

impl UiVerificationFile {
    pub fn path_in(workspace: &Path) -> PathBuf {
        workspace.join(UI_VERIFICATION_FILE)
    }

    /// Missing file reads as no requests.
    pub async fn load(path: &Path) -> Result<Self, VerifyError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| VerifyError::Malformed {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(VerifyError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), VerifyError> {
        let body = serde_json::to_vec_pretty(self).map_err(|source| VerifyError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        tokio::fs::write(path, body).await.map_err(|source| VerifyError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn has_pending(&self) -> bool {
        self.requests.iter().any(|r| r.status == VerificationStatus::PendingHuman)
    }

    /// Resolve every request for `feature_id`. Returns how many matched.
    pub fn resolve(&mut self, feature_id: &str, approved: bool, feedback: Option<&str>) -> usize {
        let status = if approved {
            VerificationStatus::Approved
        } else {
            VerificationStatus::Rejected
        };
        let mut matched = 0;
        for request in self.requests.iter_mut().filter(|r| r.feature_id == feature_id) {
            request.status = status.clone();
            if let Some(feedback) = feedback {
                request.feedback = feedback.to_string();
            }
            matched += 1;
        }
        matched
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub remaining_pending: usize,
    pub blocker_cleared: bool,
}

/// Record a human verdict for `feature_id` and clear the UI blocker once
/// nothing is left pending.
pub async fn verify_feature(
    workspace: &Path,
    project_id: &str,
    feature_id: &str,
    approved: bool,
    feedback: Option<&str>,
    signals: &SignalChannel,
) -> Result<VerifyOutcome, VerifyError> {
    let path = UiVerificationFile::path_in(workspace);
    let mut file = UiVerificationFile::load(&path).await?;

    if file.resolve(feature_id, approved, feedback) == 0 {
        return Err(VerifyError::RequestNotFound(feature_id.to_string()));
    }
    file.save(&path).await?;
    info!(project_id, feature_id, approved, "UI verification recorded");

    let remaining_pending = file
        .requests
        .iter()
        .filter(|r| r.status == VerificationStatus::PendingHuman)
        .count();
    let blocker_cleared = if remaining_pending == 0 {
        signals.clear_ui_verification_blocker(project_id).await?
    } else {
        false
    };

    Ok(VerifyOutcome {
        remaining_pending,
        blocker_cleared,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::SystemClock;
    use crate::domain::signal::BLOCKER;
    use crate::infrastructure::repositories::InMemoryCoordinationStore;
    use std::sync::Arc;

    const TWO_PENDING: &str = r#"{"requests":[
        {"feature_id":"login","instruction":"Check the form","status":"pending_human","feedback":""},
        {"feature_id":"logout","instruction":"Check the button","status":"pending_human","feedback":""}
    ]}"#;

    #[tokio::test]
    async fn test_blocker_cleared_after_last_pending_resolved() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(UI_VERIFICATION_FILE), TWO_PENDING).await.unwrap();
        let signals = SignalChannel::new(Arc::new(InMemoryCoordinationStore::new()), Arc::new(SystemClock));
        signals.set_blocker("p", "UI Verification Required: 2 pages").await.unwrap();

        let first = verify_feature(dir.path(), "p", "login", true, None, &signals).await.unwrap();
        assert_eq!(first, VerifyOutcome { remaining_pending: 1, blocker_cleared: false });
        assert!(!signals.get_signal("p", BLOCKER).await.unwrap().is_empty());

        let second = verify_feature(dir.path(), "p", "logout", false, Some("button missing"), &signals)
            .await
            .unwrap();
        assert!(second.blocker_cleared);
        assert_eq!(signals.get_signal("p", BLOCKER).await.unwrap(), "");

        let file = UiVerificationFile::load(&dir.path().join(UI_VERIFICATION_FILE)).await.unwrap();
        assert_eq!(file.requests[0].status, VerificationStatus::Approved);
        assert_eq!(file.requests[1].status, VerificationStatus::Rejected);
        assert_eq!(file.requests[1].feedback, "button missing");
    }

    #[tokio::test]
    async fn test_unknown_feature_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let signals = SignalChannel::new(Arc::new(InMemoryCoordinationStore::new()), Arc::new(SystemClock));
        let err = verify_feature(dir.path(), "p", "ghost", true, None, &signals).await.unwrap_err();
        assert!(matches!(err, VerifyError::RequestNotFound(_)));
    }
}
