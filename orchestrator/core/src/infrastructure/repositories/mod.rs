// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the coordination store traits defined in
//! `crate::domain::repository`.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve coordination state
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **SqliteCoordinationStore** - single-host deployments, WAL mode, the default
//! - **PostgresCoordinationStore** - shared store for agents on several hosts
//! - **InMemoryCoordinationStore** - tests and throwaway runs; one process only
//!
//! All three implement every trait, so a backend is always swapped as a whole.

pub mod postgres;
pub mod sqlite;

pub use postgres::PostgresCoordinationStore;
pub use sqlite::SqliteCoordinationStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::lock::FileLock;
use crate::domain::observation::Observation;
use crate::domain::repository::{
    DocumentEdit, FeatureRepository, LockRepository, ObservationRepository, RepositoryError,
    SignalRepository, SpecRepository,
};
use crate::domain::signal::Signal;

type ProjectKey = (String, String);

#[derive(Debug, Default)]
struct InMemoryState {
    features: HashMap<String, String>,
    specs: HashMap<String, String>,
    signals: HashMap<ProjectKey, Signal>,
    locks: HashMap<ProjectKey, FileLock>,
    observations: Vec<Observation>,
    next_observation_id: i64,
}

/// Thread-safe HashMap-backed store. One lock guards all tables, which gives
/// the same atomicity the SQL backends get from transactions.
#[derive(Clone, Default)]
pub struct InMemoryCoordinationStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(project_id: &str, name: &str) -> ProjectKey {
    (project_id.to_string(), name.to_string())
}

#[async_trait]
impl FeatureRepository for InMemoryCoordinationStore {
    async fn save_features(&self, project_id: &str, content: &str, _now: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.state
            .write()
            .features
            .insert(project_id.to_string(), content.to_string());
        Ok(())
    }

    async fn get_features(&self, project_id: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self.state.read().features.get(project_id).cloned())
    }

    async fn update_features(
        &self,
        project_id: &str,
        edit: DocumentEdit<'_>,
        _now: DateTime<Utc>,
    ) -> Result<String, RepositoryError> {
        let mut state = self.state.write();
        let document = state
            .features
            .get_mut(project_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("no feature list for project '{}'", project_id)))?;
        let updated = edit(document)?;
        *document = updated.clone();
        Ok(updated)
    }
}

#[async_trait]
impl SpecRepository for InMemoryCoordinationStore {
    async fn save_spec(&self, project_id: &str, content: &str, _now: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.state
            .write()
            .specs
            .insert(project_id.to_string(), content.to_string());
        Ok(())
    }

    async fn get_spec(&self, project_id: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self.state.read().specs.get(project_id).cloned())
    }
}

#[async_trait]
impl SignalRepository for InMemoryCoordinationStore {
    async fn set_signal(&self, project_id: &str, key_name: &str, value: &str, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.state.write().signals.insert(
            key(project_id, key_name),
            Signal {
                project_id: project_id.to_string(),
                key: key_name.to_string(),
                value: value.to_string(),
                created_at: now,
            },
        );
        Ok(())
    }

    async fn get_signal(&self, project_id: &str, key_name: &str) -> Result<Option<String>, RepositoryError> {
        Ok(self
            .state
            .read()
            .signals
            .get(&key(project_id, key_name))
            .map(|s| s.value.clone()))
    }

    async fn delete_signal(&self, project_id: &str, key_name: &str) -> Result<(), RepositoryError> {
        self.state.write().signals.remove(&key(project_id, key_name));
        Ok(())
    }

    async fn list_signals(&self, project_id: &str) -> Result<Vec<Signal>, RepositoryError> {
        let mut signals: Vec<Signal> = self
            .state
            .read()
            .signals
            .values()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect();
        signals.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(signals)
    }

    async fn delete_signals_before(&self, cutoff: DateTime<Utc>, keep: &[&str]) -> Result<u64, RepositoryError> {
        let mut state = self.state.write();
        let before = state.signals.len();
        state
            .signals
            .retain(|_, s| s.created_at >= cutoff || keep.contains(&s.key.as_str()));
        Ok((before - state.signals.len()) as u64)
    }
}

#[async_trait]
impl LockRepository for InMemoryCoordinationStore {
    async fn find_lock(&self, project_id: &str, path: &str) -> Result<Option<FileLock>, RepositoryError> {
        Ok(self.state.read().locks.get(&key(project_id, path)).cloned())
    }

    async fn insert_lock(&self, lock: &FileLock) -> Result<bool, RepositoryError> {
        let mut state = self.state.write();
        let k = key(&lock.project_id, &lock.path);
        if state.locks.contains_key(&k) {
            return Ok(false);
        }
        state.locks.insert(k, lock.clone());
        Ok(true)
    }

    async fn hijack_lock(&self, lock: &FileLock, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let mut state = self.state.write();
        match state.locks.get_mut(&key(&lock.project_id, &lock.path)) {
            Some(existing) if existing.expires_at < now => {
                *existing = lock.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn renew_lock(
        &self,
        project_id: &str,
        path: &str,
        agent_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write();
        match state.locks.get_mut(&key(project_id, path)) {
            Some(existing) if existing.agent_id == agent_id && existing.expires_at >= now => {
                existing.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_owned_lock(&self, project_id: &str, path: &str, agent_id: &str) -> Result<u64, RepositoryError> {
        let mut state = self.state.write();
        let k = key(project_id, path);
        let owned = state.locks.get(&k).is_some_and(|l| l.agent_id == agent_id);
        if owned {
            state.locks.remove(&k);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn delete_lock(&self, project_id: &str, path: &str) -> Result<u64, RepositoryError> {
        Ok(self.state.write().locks.remove(&key(project_id, path)).map_or(0, |_| 1))
    }

    async fn delete_agent_locks(&self, project_id: &str, agent_id: &str) -> Result<u64, RepositoryError> {
        let mut state = self.state.write();
        let before = state.locks.len();
        state
            .locks
            .retain(|_, l| !(l.project_id == project_id && l.agent_id == agent_id));
        Ok((before - state.locks.len()) as u64)
    }

    async fn list_active_locks(&self, project_id: &str, now: DateTime<Utc>) -> Result<Vec<FileLock>, RepositoryError> {
        let mut locks: Vec<FileLock> = self
            .state
            .read()
            .locks
            .values()
            .filter(|l| l.project_id == project_id && !l.is_expired(now))
            .cloned()
            .collect();
        locks.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(locks)
    }

    async fn delete_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut state = self.state.write();
        let before = state.locks.len();
        state.locks.retain(|_, l| !l.is_expired(now));
        Ok((before - state.locks.len()) as u64)
    }
}

#[async_trait]
impl ObservationRepository for InMemoryCoordinationStore {
    async fn save_observation(
        &self,
        project_id: &str,
        agent_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write();
        state.next_observation_id += 1;
        let id = state.next_observation_id;
        state.observations.push(Observation {
            id,
            project_id: project_id.to_string(),
            agent_id: agent_id.to_string(),
            content: content.to_string(),
            created_at: now,
        });
        Ok(())
    }

    async fn query_history(&self, project_id: &str, limit: usize) -> Result<Vec<Observation>, RepositoryError> {
        let state = self.state.read();
        let mut history: Vec<Observation> = state
            .observations
            .iter()
            .filter(|o| o.project_id == project_id)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        history.truncate(limit);
        Ok(history)
    }

    async fn trim_observations(&self, keep: u64) -> Result<u64, RepositoryError> {
        let mut state = self.state.write();
        let keep = usize::try_from(keep).unwrap_or(usize::MAX);
        if state.observations.len() <= keep {
            return Ok(0);
        }
        state
            .observations
            .sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let removed = state.observations.len() - keep;
        state.observations.truncate(keep);
        Ok(removed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn lock(agent: &str, now: DateTime<Utc>, lease: Duration) -> FileLock {
        FileLock {
            project_id: "p".into(),
            path: "/a.go".into(),
            agent_id: agent.into(),
            created_at: now,
            expires_at: now + lease,
        }
    }

    #[tokio::test]
    async fn test_insert_is_exclusive() {
        let store = InMemoryCoordinationStore::new();
        let now = Utc::now();

        assert!(store.insert_lock(&lock("a1", now, Duration::minutes(10))).await.unwrap());
        assert!(!store.insert_lock(&lock("a2", now, Duration::minutes(10))).await.unwrap());
    }

    #[tokio::test]
    async fn test_hijack_only_after_expiry() {
        let store = InMemoryCoordinationStore::new();
        let now = Utc::now();
        store.insert_lock(&lock("a1", now, Duration::minutes(10))).await.unwrap();

        let takeover = lock("a2", now, Duration::minutes(10));
        assert!(!store.hijack_lock(&takeover, now).await.unwrap());

        let later = now + Duration::minutes(11);
        assert!(store.hijack_lock(&lock("a2", later, Duration::minutes(10)), later).await.unwrap());
        assert_eq!(store.find_lock("p", "/a.go").await.unwrap().unwrap().agent_id, "a2");
    }

    #[tokio::test]
    async fn test_update_features_missing_document() {
        let store = InMemoryCoordinationStore::new();
        let edit = |c: &str| Ok::<_, RepositoryError>(c.to_string());

        let err = store.update_features("nope", &edit, Utc::now()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_trim_keeps_newest() {
        let store = InMemoryCoordinationStore::new();
        let start = Utc::now();
        for i in 0..5 {
            store
                .save_observation("p", "agent", &format!("obs {}", i), start + Duration::seconds(i))
                .await
                .unwrap();
        }

        assert_eq!(store.trim_observations(2).await.unwrap(), 3);
        let history = store.query_history("p", 10).await.unwrap();
        let contents: Vec<_> = history.iter().map(|o| o.content.as_str()).collect();
        assert_eq!(contents, vec!["obs 4", "obs 3"]);
    }
}
