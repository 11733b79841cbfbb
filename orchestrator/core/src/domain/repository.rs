// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Coordination Store Interfaces
//!
//! Persistence contracts for everything agents share. The store is the single
//! source of truth; no process holds coordination state in memory between
//! calls.
//!
//! | Trait | Table | Implementations |
//! |-------|-------|----------------|
//! | `FeatureRepository` | `project_features` | in-memory, SQLite, PostgreSQL |
//! | `SpecRepository` | `project_specs` | in-memory, SQLite, PostgreSQL |
//! | `SignalRepository` | `signals` | in-memory, SQLite, PostgreSQL |
//! | `LockRepository` | `file_locks` | in-memory, SQLite, PostgreSQL |
//! | `ObservationRepository` | `observations` | in-memory, SQLite, PostgreSQL |
//!
//! ## Time
//!
//! Every method that compares or stamps time takes `now` from the caller.
//! Implementations never consult the database clock.
//!
//! ## Lock primitives
//!
//! `LockRepository` exposes single-statement primitives (conditional insert,
//! conditional update, conditional delete). The acquire algorithm composed from
//! them lives in `crate::application::lock_manager`, identical for every
//! backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::lock::FileLock;
use crate::domain::observation::Observation;
use crate::domain::signal::Signal;

/// Storage backend selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[serde(rename = "memory")]
    InMemory,
    #[default]
    Sqlite,
    Postgres,
}

impl std::str::FromStr for StorageBackend {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "inmemory" | "in-memory" => Ok(StorageBackend::InMemory),
            "sqlite" | "sqlite3" => Ok(StorageBackend::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(StorageBackend::Postgres),
            other => Err(RepositoryError::Unknown(format!("unknown storage backend '{}'", other))),
        }
    }
}

/// Pure edit applied to a stored document inside the store's read-modify-write
/// transaction. Receives the current content and returns the replacement.
pub type DocumentEdit<'a> = &'a (dyn Fn(&str) -> Result<String, RepositoryError> + Send + Sync);

#[async_trait]
pub trait FeatureRepository: Send + Sync {
    /// Replace the project's feature document verbatim.
    async fn save_features(&self, project_id: &str, content: &str, now: DateTime<Utc>) -> Result<(), RepositoryError>;

    async fn get_features(&self, project_id: &str) -> Result<Option<String>, RepositoryError>;

    /// Read, edit and write back the project's feature document under a row
    /// lock, so two concurrent edits never interleave. Returns the new content.
    async fn update_features(
        &self,
        project_id: &str,
        edit: DocumentEdit<'_>,
        now: DateTime<Utc>,
    ) -> Result<String, RepositoryError>;
}

#[async_trait]
pub trait SpecRepository: Send + Sync {
    async fn save_spec(&self, project_id: &str, content: &str, now: DateTime<Utc>) -> Result<(), RepositoryError>;
    async fn get_spec(&self, project_id: &str) -> Result<Option<String>, RepositoryError>;
}

#[async_trait]
pub trait SignalRepository: Send + Sync {
    /// Upsert; overwrites value and timestamp.
    async fn set_signal(&self, project_id: &str, key: &str, value: &str, now: DateTime<Utc>) -> Result<(), RepositoryError>;

    async fn get_signal(&self, project_id: &str, key: &str) -> Result<Option<String>, RepositoryError>;

    async fn delete_signal(&self, project_id: &str, key: &str) -> Result<(), RepositoryError>;

    async fn list_signals(&self, project_id: &str) -> Result<Vec<Signal>, RepositoryError>;

    /// Delete signals of every project created before `cutoff` whose key is not
    /// in `keep`. Returns the number of rows removed.
    async fn delete_signals_before(&self, cutoff: DateTime<Utc>, keep: &[&str]) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait LockRepository: Send + Sync {
    async fn find_lock(&self, project_id: &str, path: &str) -> Result<Option<FileLock>, RepositoryError>;

    /// Insert if no row exists for `(project_id, path)`. Returns false when
    /// another writer got there first.
    async fn insert_lock(&self, lock: &FileLock) -> Result<bool, RepositoryError>;

    /// Take over the row for `(lock.project_id, lock.path)` only if its current
    /// lease ended before `now`. Returns false if the row changed underneath.
    async fn hijack_lock(&self, lock: &FileLock, now: DateTime<Utc>) -> Result<bool, RepositoryError>;

    /// Extend the lease if `agent_id` still holds an unexpired lease.
    async fn renew_lock(
        &self,
        project_id: &str,
        path: &str,
        agent_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Delete only if held by `agent_id`. Returns rows removed.
    async fn delete_owned_lock(&self, project_id: &str, path: &str, agent_id: &str) -> Result<u64, RepositoryError>;

    /// Delete regardless of owner.
    async fn delete_lock(&self, project_id: &str, path: &str) -> Result<u64, RepositoryError>;

    async fn delete_agent_locks(&self, project_id: &str, agent_id: &str) -> Result<u64, RepositoryError>;

    /// Unexpired rows of one project, ordered by path.
    async fn list_active_locks(&self, project_id: &str, now: DateTime<Utc>) -> Result<Vec<FileLock>, RepositoryError>;

    async fn delete_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait ObservationRepository: Send + Sync {
    async fn save_observation(
        &self,
        project_id: &str,
        agent_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Most recent first.
    async fn query_history(&self, project_id: &str, limit: usize) -> Result<Vec<Observation>, RepositoryError>;

    /// Keep the newest `keep` rows across all projects. Returns rows removed.
    async fn trim_observations(&self, keep: u64) -> Result<u64, RepositoryError>;
}

/// Everything a backend must provide.
pub trait CoordinationStore:
    FeatureRepository + SpecRepository + SignalRepository + LockRepository + ObservationRepository
{
}

impl<T> CoordinationStore for T where
    T: FeatureRepository + SpecRepository + SignalRepository + LockRepository + ObservationRepository
{
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_str() {
        assert_eq!("SQLite".parse::<StorageBackend>().unwrap(), StorageBackend::Sqlite);
        assert_eq!("postgresql".parse::<StorageBackend>().unwrap(), StorageBackend::Postgres);
        assert_eq!("memory".parse::<StorageBackend>().unwrap(), StorageBackend::InMemory);
        assert!("mongo".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: RepositoryError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }
}
