// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Coordination Store
//!
//! PostgreSQL implementation of every coordination store trait, for agents
//! spread over several hosts. The feature document is edited inside a
//! transaction holding `SELECT … FOR UPDATE` on its row.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements the coordination store on PostgreSQL

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::lock::FileLock;
use crate::domain::observation::Observation;
use crate::domain::repository::{
    DocumentEdit, FeatureRepository, LockRepository, ObservationRepository, RepositoryError,
    SignalRepository, SpecRepository,
};
use crate::domain::signal::Signal;

#[derive(Clone)]
pub struct PostgresCoordinationStore {
    pool: PgPool,
}

impl PostgresCoordinationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_lock_row(row: &PgRow) -> Result<FileLock, RepositoryError> {
    Ok(FileLock {
        project_id: row.try_get("project_id")?,
        path: row.try_get("path")?,
        agent_id: row.try_get("agent_id")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[async_trait]
impl FeatureRepository for PostgresCoordinationStore {
    async fn save_features(&self, project_id: &str, content: &str, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO project_features (project_id, content, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (project_id) DO UPDATE SET
                content = EXCLUDED.content,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(project_id)
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save features: {}", e)))?;
        Ok(())
    }

    async fn get_features(&self, project_id: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT content FROM project_features WHERE project_id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("content")).transpose().map_err(Into::into)
    }

    async fn update_features(
        &self,
        project_id: &str,
        edit: DocumentEdit<'_>,
        now: DateTime<Utc>,
    ) -> Result<String, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT content FROM project_features WHERE project_id = $1 FOR UPDATE")
            .bind(project_id)
            .fetch_optional(&mut *tx)
            .await?;
        let current: String = match row {
            Some(row) => row.try_get("content")?,
            None => {
                return Err(RepositoryError::NotFound(format!(
                    "no feature list for project '{}'",
                    project_id
                )))
            }
        };

        // Dropping `tx` on an early return rolls back.
        let updated = edit(&current)?;

        sqlx::query("UPDATE project_features SET content = $1, updated_at = $2 WHERE project_id = $3")
            .bind(&updated)
            .bind(now)
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(updated)
    }
}

#[async_trait]
impl SpecRepository for PostgresCoordinationStore {
    async fn save_spec(&self, project_id: &str, content: &str, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO project_specs (project_id, content, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (project_id) DO UPDATE SET
                content = EXCLUDED.content,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(project_id)
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_spec(&self, project_id: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT content FROM project_specs WHERE project_id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("content")).transpose().map_err(Into::into)
    }
}

#[async_trait]
impl SignalRepository for PostgresCoordinationStore {
    async fn set_signal(&self, project_id: &str, key: &str, value: &str, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO signals (project_id, key, value, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (project_id, key) DO UPDATE SET
                value = EXCLUDED.value,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(project_id)
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_signal(&self, project_id: &str, key: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT value FROM signals WHERE project_id = $1 AND key = $2")
            .bind(project_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("value")).transpose().map_err(Into::into)
    }

    async fn delete_signal(&self, project_id: &str, key: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM signals WHERE project_id = $1 AND key = $2")
            .bind(project_id)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_signals(&self, project_id: &str) -> Result<Vec<Signal>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT project_id, key, value, created_at FROM signals WHERE project_id = $1 ORDER BY key",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Signal {
                    project_id: row.try_get("project_id")?,
                    key: row.try_get("key")?,
                    value: row.try_get("value")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn delete_signals_before(&self, cutoff: DateTime<Utc>, keep: &[&str]) -> Result<u64, RepositoryError> {
        let keep: Vec<String> = keep.iter().map(|k| k.to_string()).collect();
        let result = sqlx::query("DELETE FROM signals WHERE created_at < $1 AND NOT (key = ANY($2))")
            .bind(cutoff)
            .bind(&keep)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LockRepository for PostgresCoordinationStore {
    async fn find_lock(&self, project_id: &str, path: &str) -> Result<Option<FileLock>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT project_id, path, agent_id, created_at, expires_at
            FROM file_locks
            WHERE project_id = $1 AND path = $2
            "#,
        )
        .bind(project_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(parse_lock_row).transpose()
    }

    async fn insert_lock(&self, lock: &FileLock) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO file_locks (project_id, path, agent_id, lock_type, created_at, expires_at)
            VALUES ($1, $2, $3, 'exclusive', $4, $5)
            ON CONFLICT (project_id, path) DO NOTHING
            "#,
        )
        .bind(&lock.project_id)
        .bind(&lock.path)
        .bind(&lock.agent_id)
        .bind(lock.created_at)
        .bind(lock.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn hijack_lock(&self, lock: &FileLock, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE file_locks
            SET agent_id = $1, created_at = $2, expires_at = $3
            WHERE project_id = $4 AND path = $5 AND expires_at < $6
            "#,
        )
        .bind(&lock.agent_id)
        .bind(lock.created_at)
        .bind(lock.expires_at)
        .bind(&lock.project_id)
        .bind(&lock.path)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn renew_lock(
        &self,
        project_id: &str,
        path: &str,
        agent_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE file_locks
            SET expires_at = $1
            WHERE project_id = $2 AND path = $3 AND agent_id = $4 AND expires_at >= $5
            "#,
        )
        .bind(expires_at)
        .bind(project_id)
        .bind(path)
        .bind(agent_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_owned_lock(&self, project_id: &str, path: &str, agent_id: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM file_locks WHERE project_id = $1 AND path = $2 AND agent_id = $3")
            .bind(project_id)
            .bind(path)
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_lock(&self, project_id: &str, path: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM file_locks WHERE project_id = $1 AND path = $2")
            .bind(project_id)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_agent_locks(&self, project_id: &str, agent_id: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM file_locks WHERE project_id = $1 AND agent_id = $2")
            .bind(project_id)
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_active_locks(&self, project_id: &str, now: DateTime<Utc>) -> Result<Vec<FileLock>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT project_id, path, agent_id, created_at, expires_at
            FROM file_locks
            WHERE project_id = $1 AND expires_at >= $2
            ORDER BY path
            "#,
        )
        .bind(project_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_lock_row).collect()
    }

    async fn delete_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM file_locks WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ObservationRepository for PostgresCoordinationStore {
    async fn save_observation(
        &self,
        project_id: &str,
        agent_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO observations (project_id, agent_id, content, created_at) VALUES ($1, $2, $3, $4)")
            .bind(project_id)
            .bind(agent_id)
            .bind(content)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query_history(&self, project_id: &str, limit: usize) -> Result<Vec<Observation>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, agent_id, content, created_at
            FROM observations
            WHERE project_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(project_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Observation {
                    id: row.try_get("id")?,
                    project_id: row.try_get("project_id")?,
                    agent_id: row.try_get("agent_id")?,
                    content: row.try_get("content")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn trim_observations(&self, keep: u64) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            DELETE FROM observations
            WHERE id NOT IN (
                SELECT id FROM observations ORDER BY created_at DESC, id DESC LIMIT $1
            )
            "#,
        )
        .bind(i64::try_from(keep).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::db::Database;
    use chrono::Duration;

    /// Runs only when `RECAC_TEST_POSTGRES_URL` points at a scratch database.
    async fn open_store() -> Option<PostgresCoordinationStore> {
        let url = std::env::var("RECAC_TEST_POSTGRES_URL").ok()?;
        match Database::postgres(&url, 2).await.unwrap() {
            Database::Postgres(pool) => Some(PostgresCoordinationStore::new(pool)),
            Database::Sqlite(_) => None,
        }
    }

    #[tokio::test]
    async fn test_lock_hijack_after_expiry() {
        let Some(store) = open_store().await else {
            return;
        };
        let project = format!("pg-test-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
        let now = Utc::now();
        let first = FileLock {
            project_id: project.clone(),
            path: "/a.go".into(),
            agent_id: "agent1".into(),
            created_at: now,
            expires_at: now + Duration::minutes(10),
        };

        assert!(store.insert_lock(&first).await.unwrap());
        let later = now + Duration::minutes(11);
        let second = FileLock {
            agent_id: "agent2".into(),
            created_at: later,
            expires_at: later + Duration::minutes(10),
            ..first.clone()
        };
        assert!(!store.hijack_lock(&second, now).await.unwrap());
        assert!(store.hijack_lock(&second, later).await.unwrap());
        assert_eq!(store.delete_agent_locks(&project, "agent2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_features_under_row_lock() {
        let Some(store) = open_store().await else {
            return;
        };
        let project = format!("pg-test-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
        store.save_features(&project, "1", Utc::now()).await.unwrap();

        let double = |c: &str| -> Result<String, RepositoryError> {
            let n: u32 = c.parse().map_err(|_| RepositoryError::MalformedData(c.to_string()))?;
            Ok((n * 2).to_string())
        };
        assert_eq!(store.update_features(&project, &double, Utc::now()).await.unwrap(), "2");
    }
}
