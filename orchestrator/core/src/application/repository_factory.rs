// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Builds the coordination store for the configured backend and hands each
//! service the trait object it needs. All handles in one [`Repositories`]
//! point at the same store.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Wires concrete store implementations behind domain traits

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::domain::config::DatabaseConfig;
use crate::domain::repository::{
    CoordinationStore, FeatureRepository, LockRepository, ObservationRepository, SignalRepository,
    SpecRepository, StorageBackend,
};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::{
    InMemoryCoordinationStore, PostgresCoordinationStore, SqliteCoordinationStore,
};

#[derive(Clone)]
pub struct Repositories {
    pub features: Arc<dyn FeatureRepository>,
    pub specs: Arc<dyn SpecRepository>,
    pub signals: Arc<dyn SignalRepository>,
    pub locks: Arc<dyn LockRepository>,
    pub observations: Arc<dyn ObservationRepository>,
    database: Option<Database>,
}

impl Repositories {
    /// Share one store across every repository handle.
    pub fn from_store<S: CoordinationStore + 'static>(store: Arc<S>) -> Self {
        Self {
            features: store.clone(),
            specs: store.clone(),
            signals: store.clone(),
            locks: store.clone(),
            observations: store,
            database: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::from_store(Arc::new(InMemoryCoordinationStore::new()))
    }

    /// Open the configured backend, applying migrations first.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        match config.backend {
            StorageBackend::InMemory => {
                info!("Using in-memory coordination store");
                Ok(Self::in_memory())
            }
            StorageBackend::Sqlite => {
                let database = Database::sqlite(&config.url, config.max_connections).await?;
                info!(url = %config.url, "Using SQLite coordination store");
                Ok(Self::from_database(database))
            }
            StorageBackend::Postgres => {
                let database = Database::postgres(&config.url, config.max_connections).await?;
                info!("Using PostgreSQL coordination store");
                Ok(Self::from_database(database))
            }
        }
    }

    fn from_database(database: Database) -> Self {
        let mut repos = match &database {
            Database::Sqlite(pool) => Self::from_store(Arc::new(SqliteCoordinationStore::new(pool.clone()))),
            Database::Postgres(pool) => Self::from_store(Arc::new(PostgresCoordinationStore::new(pool.clone()))),
        };
        repos.database = Some(database);
        repos
    }

    /// Close the underlying pool, if any.
    pub async fn close(&self) {
        if let Some(database) = &self.database {
            database.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_handles_share_one_store() {
        let repos = Repositories::in_memory();
        repos.signals.set_signal("p", "K", "v", Utc::now()).await.unwrap();
        assert_eq!(repos.signals.get_signal("p", "K").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_open_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            backend: StorageBackend::Sqlite,
            url: dir.path().join("coord.db").to_string_lossy().into_owned(),
            max_connections: 2,
        };
        let repos = Repositories::open(&config).await.unwrap();
        repos.specs.save_spec("p", "# App", Utc::now()).await.unwrap();
        assert_eq!(repos.specs.get_spec("p").await.unwrap().as_deref(), Some("# App"));
        repos.close().await;
    }
}
