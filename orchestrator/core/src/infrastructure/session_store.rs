// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! File-backed [`SessionManager`]: one `<name>.json` per session under a
//! sessions directory, archived sessions move to `archive/`.

use crate::domain::session::{SessionManager, SessionState, SessionStoreError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const ARCHIVE_DIR: &str = "archive";

pub struct FileSessionManager {
    root: PathBuf,
}

impl FileSessionManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `~/.recac/sessions`, or `.recac/sessions` when no home directory is known.
    pub fn default_root() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".recac").join("sessions"))
            .unwrap_or_else(|| PathBuf::from(".recac").join("sessions"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }

    fn archive_path(&self, name: &str) -> PathBuf {
        self.root.join(ARCHIVE_DIR).join(format!("{}.json", name))
    }
}

#[async_trait]
impl SessionManager for FileSessionManager {
    async fn save(&self, state: &SessionState) -> Result<(), SessionStoreError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let body = serde_json::to_vec_pretty(state)?;

        // Write-then-rename so readers never see a torn file
        let path = self.state_path(&state.name);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(session = %state.name, status = ?state.status, "Saved session state");
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<SessionState>, SessionStoreError> {
        match tokio::fs::read(self.state_path(name)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<SessionState>, SessionStoreError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<SessionState>(&bytes) {
                Ok(state) => sessions.push(state),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable session file"),
            }
        }
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(sessions)
    }

    async fn archive(&self, name: &str) -> Result<(), SessionStoreError> {
        let from = self.state_path(name);
        if !tokio::fs::try_exists(&from).await? {
            return Err(SessionStoreError::NotFound(name.to_string()));
        }
        tokio::fs::create_dir_all(self.root.join(ARCHIVE_DIR)).await?;
        tokio::fs::rename(&from, self.archive_path(name)).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), SessionStoreError> {
        match tokio::fs::remove_file(self.state_path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SessionStoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::SessionStatus;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_save_load_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionManager::new(dir.path());
        let now = Utc::now();

        assert!(store.load("alpha").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());

        let mut alpha = SessionState::new("alpha", "/work/a", now);
        alpha.status = SessionStatus::Running;
        store.save(&alpha).await.unwrap();
        store
            .save(&SessionState::new("beta", "/work/b", now + Duration::seconds(5)))
            .await
            .unwrap();

        let loaded = store.load("alpha").await.unwrap().unwrap();
        assert_eq!(loaded, alpha);

        let names: Vec<String> = store.list().await.unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn test_archive_moves_file_out_of_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionManager::new(dir.path());
        store.save(&SessionState::new("alpha", "/w", Utc::now())).await.unwrap();

        store.archive("alpha").await.unwrap();
        assert!(store.load("alpha").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
        assert!(dir.path().join("archive").join("alpha.json").exists());

        assert!(matches!(
            store.archive("alpha").await,
            Err(SessionStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionManager::new(dir.path());
        assert!(matches!(store.remove("ghost").await, Err(SessionStoreError::NotFound(_))));
    }
}
