// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sqlite Coordination Store
//!
//! SQLite implementation of every coordination store trait. Timestamps are
//! stored as integer milliseconds so range predicates compare numerically.
//!
//! The feature document read-modify-write runs inside `BEGIN IMMEDIATE`, which
//! takes the database write lock up front. That is SQLite's equivalent of
//! `SELECT … FOR UPDATE`: a second writer waits on the busy timeout instead of
//! reading a snapshot that is about to change.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements the coordination store on SQLite

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::domain::lock::FileLock;
use crate::domain::observation::Observation;
use crate::domain::repository::{
    DocumentEdit, FeatureRepository, LockRepository, ObservationRepository, RepositoryError,
    SignalRepository, SpecRepository,
};
use crate::domain::signal::Signal;

#[derive(Clone)]
pub struct SqliteCoordinationStore {
    pool: SqlitePool,
}

impl SqliteCoordinationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| RepositoryError::MalformedData(format!("timestamp out of range: {}", ms)))
}

fn parse_lock_row(row: &SqliteRow) -> Result<FileLock, RepositoryError> {
    Ok(FileLock {
        project_id: row.try_get("project_id")?,
        path: row.try_get("path")?,
        agent_id: row.try_get("agent_id")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        expires_at: from_millis(row.try_get("expires_at")?)?,
    })
}

async fn edit_features_locked(
    conn: &mut SqliteConnection,
    project_id: &str,
    edit: DocumentEdit<'_>,
    now: DateTime<Utc>,
) -> Result<String, RepositoryError> {
    let row = sqlx::query("SELECT content FROM project_features WHERE project_id = ?")
        .bind(project_id)
        .fetch_optional(&mut *conn)
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

    let updated = edit(&current)?;

    sqlx::query("UPDATE project_features SET content = ?, updated_at = ? WHERE project_id = ?")
        .bind(&updated)
        .bind(millis(now))
        .bind(project_id)
        .execute(&mut *conn)
        .await?;

    Ok(updated)
}

#[async_trait]
impl FeatureRepository for SqliteCoordinationStore {
    async fn save_features(&self, project_id: &str, content: &str, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO project_features (project_id, content, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (project_id) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id)
        .bind(content)
        .bind(millis(now))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save features: {}", e)))?;
        Ok(())
    }

    async fn get_features(&self, project_id: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT content FROM project_features WHERE project_id = ?")
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
        // IMMEDIATE takes the write lock up front so two updaters cannot both
        // read the old document. Dropping `tx` before commit rolls back.
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let updated = edit_features_locked(&mut tx, project_id, edit, now).await?;
        tx.commit().await?;
        Ok(updated)
    }
}

#[async_trait]
impl SpecRepository for SqliteCoordinationStore {
    async fn save_spec(&self, project_id: &str, content: &str, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO project_specs (project_id, content, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (project_id) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id)
        .bind(content)
        .bind(millis(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_spec(&self, project_id: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT content FROM project_specs WHERE project_id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("content")).transpose().map_err(Into::into)
    }
}

#[async_trait]
impl SignalRepository for SqliteCoordinationStore {
    async fn set_signal(&self, project_id: &str, key: &str, value: &str, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO signals (project_id, key, value, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (project_id, key) DO UPDATE SET
                value = excluded.value,
                created_at = excluded.created_at
            "#,
        )
        .bind(project_id)
        .bind(key)
        .bind(value)
        .bind(millis(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_signal(&self, project_id: &str, key: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT value FROM signals WHERE project_id = ? AND key = ?")
            .bind(project_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("value")).transpose().map_err(Into::into)
    }

    async fn delete_signal(&self, project_id: &str, key: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM signals WHERE project_id = ? AND key = ?")
            .bind(project_id)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_signals(&self, project_id: &str) -> Result<Vec<Signal>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT project_id, key, value, created_at FROM signals WHERE project_id = ? ORDER BY key",
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
                    created_at: from_millis(row.try_get("created_at")?)?,
                })
            })
            .collect()
    }

    async fn delete_signals_before(&self, cutoff: DateTime<Utc>, keep: &[&str]) -> Result<u64, RepositoryError> {
        let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM signals WHERE created_at < ");
        query.push_bind(millis(cutoff));
        if !keep.is_empty() {
            query.push(" AND key NOT IN (");
            let mut keys = query.separated(", ");
            for key in keep {
                keys.push_bind(key.to_string());
            }
            keys.push_unseparated(")");
        }

        let result = query.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl LockRepository for SqliteCoordinationStore {
    async fn find_lock(&self, project_id: &str, path: &str) -> Result<Option<FileLock>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT project_id, path, agent_id, created_at, expires_at
            FROM file_locks
            WHERE project_id = ? AND path = ?
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
            VALUES (?, ?, ?, 'exclusive', ?, ?)
            ON CONFLICT (project_id, path) DO NOTHING
            "#,
        )
        .bind(&lock.project_id)
        .bind(&lock.path)
        .bind(&lock.agent_id)
        .bind(millis(lock.created_at))
        .bind(millis(lock.expires_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn hijack_lock(&self, lock: &FileLock, now: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE file_locks
            SET agent_id = ?, created_at = ?, expires_at = ?
            WHERE project_id = ? AND path = ? AND expires_at < ?
            "#,
        )
        .bind(&lock.agent_id)
        .bind(millis(lock.created_at))
        .bind(millis(lock.expires_at))
        .bind(&lock.project_id)
        .bind(&lock.path)
        .bind(millis(now))
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
            SET expires_at = ?
            WHERE project_id = ? AND path = ? AND agent_id = ? AND expires_at >= ?
            "#,
        )
        .bind(millis(expires_at))
        .bind(project_id)
        .bind(path)
        .bind(agent_id)
        .bind(millis(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_owned_lock(&self, project_id: &str, path: &str, agent_id: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM file_locks WHERE project_id = ? AND path = ? AND agent_id = ?")
            .bind(project_id)
            .bind(path)
            .bind(agent_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_lock(&self, project_id: &str, path: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM file_locks WHERE project_id = ? AND path = ?")
            .bind(project_id)
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_agent_locks(&self, project_id: &str, agent_id: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM file_locks WHERE project_id = ? AND agent_id = ?")
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
            WHERE project_id = ? AND expires_at >= ?
            ORDER BY path
            "#,
        )
        .bind(project_id)
        .bind(millis(now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_lock_row).collect()
    }

    async fn delete_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM file_locks WHERE expires_at < ?")
            .bind(millis(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ObservationRepository for SqliteCoordinationStore {
    async fn save_observation(
        &self,
        project_id: &str,
        agent_id: &str,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO observations (project_id, agent_id, content, created_at) VALUES (?, ?, ?, ?)")
            .bind(project_id)
            .bind(agent_id)
            .bind(content)
            .bind(millis(now))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query_history(&self, project_id: &str, limit: usize) -> Result<Vec<Observation>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, agent_id, content, created_at
            FROM observations
            WHERE project_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ?
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
                    created_at: from_millis(row.try_get("created_at")?)?,
                })
            })
            .collect()
    }

    async fn trim_observations(&self, keep: u64) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"
            DELETE FROM observations
            WHERE id NOT IN (
                SELECT id FROM observations ORDER BY created_at DESC, id DESC LIMIT ?
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
    use std::sync::Arc;

    async fn open_store(dir: &tempfile::TempDir) -> SqliteCoordinationStore {
        let path = dir.path().join("store.db");
        match Database::sqlite(path.to_str().unwrap(), 4).await.unwrap() {
            Database::Sqlite(pool) => SqliteCoordinationStore::new(pool),
            Database::Postgres(_) => unreachable!(),
        }
    }

    fn lock(agent: &str, now: DateTime<Utc>) -> FileLock {
        FileLock {
            project_id: "p".into(),
            path: "/a.go".into(),
            agent_id: agent.into(),
            created_at: now,
            expires_at: now + Duration::minutes(10),
        }
    }

    #[tokio::test]
    async fn test_features_round_trip_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let json = "{\n  \"project_name\": \"demo\",\n  \"features\": [ {\"id\": \"a\"} ]\n}";

        assert_eq!(store.get_features("demo").await.unwrap(), None);
        store.save_features("demo", json, Utc::now()).await.unwrap();
        assert_eq!(store.get_features("demo").await.unwrap().as_deref(), Some(json));
    }

    #[tokio::test]
    async fn test_update_features_rolls_back_on_edit_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.save_features("p", "original", Utc::now()).await.unwrap();

        let failing = |_: &str| Err::<String, _>(RepositoryError::NotFound("feature ID x not found".into()));
        assert!(store.update_features("p", &failing, Utc::now()).await.is_err());
        assert_eq!(store.get_features("p").await.unwrap().as_deref(), Some("original"));

        let append = |c: &str| Ok::<_, RepositoryError>(format!("{}!", c));
        assert_eq!(store.update_features("p", &append, Utc::now()).await.unwrap(), "original!");
    }

    #[tokio::test]
    async fn test_failed_update_leaves_no_open_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("single.db");
        let store = match Database::sqlite(path.to_str().unwrap(), 1).await.unwrap() {
            Database::Sqlite(pool) => SqliteCoordinationStore::new(pool),
            Database::Postgres(_) => unreachable!(),
        };
        store.save_features("p", "1", Utc::now()).await.unwrap();

        let failing = |_: &str| Err::<String, _>(RepositoryError::MalformedData("bad".into()));
        for _ in 0..3 {
            assert!(store.update_features("p", &failing, Utc::now()).await.is_err());
        }

        // The single pooled connection must be back outside any transaction.
        let bump = |c: &str| Ok::<_, RepositoryError>(format!("{}1", c));
        assert_eq!(store.update_features("p", &bump, Utc::now()).await.unwrap(), "11");
        store.set_signal("p", "NOTE", "x", Utc::now()).await.unwrap();
        assert_eq!(store.get_features("p").await.unwrap().as_deref(), Some("11"));
    }

    #[tokio::test]
    async fn test_concurrent_updates_do_not_lose_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open_store(&dir).await);
        store.save_features("p", "0", Utc::now()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let increment = |c: &str| -> Result<String, RepositoryError> {
                    let n: u32 = c.parse().map_err(|_| RepositoryError::MalformedData(c.to_string()))?;
                    Ok((n + 1).to_string())
                };
                store.update_features("p", &increment, Utc::now()).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get_features("p").await.unwrap().as_deref(), Some("8"));
    }

    #[tokio::test]
    async fn test_lock_primitives() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let now = Utc::now();

        assert!(store.insert_lock(&lock("agent1", now)).await.unwrap());
        assert!(!store.insert_lock(&lock("agent2", now)).await.unwrap());
        assert!(!store.hijack_lock(&lock("agent2", now), now).await.unwrap());

        let found = store.find_lock("p", "/a.go").await.unwrap().unwrap();
        assert_eq!(found.agent_id, "agent1");
        assert_eq!(found.expires_at.timestamp_millis(), (now + Duration::minutes(10)).timestamp_millis());

        let later = now + Duration::minutes(11);
        assert!(store.list_active_locks("p", later).await.unwrap().is_empty());
        assert!(!store.renew_lock("p", "/a.go", "agent1", later, later + Duration::minutes(10)).await.unwrap());
        assert!(store.hijack_lock(&lock("agent2", later), later).await.unwrap());

        let active = store.list_active_locks("p", later).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].agent_id, "agent2");

        assert_eq!(store.delete_owned_lock("p", "/a.go", "agent1").await.unwrap(), 0);
        assert_eq!(store.delete_agent_locks("p", "agent2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_signal_cleanup_keeps_listed_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let now = Utc::now();
        let old = now - Duration::hours(25);

        store.set_signal("p", "TRIGGER_QA", "true", old).await.unwrap();
        store.set_signal("p", "COMPLETED", "true", old).await.unwrap();
        store.set_signal("p", "BLOCKER", "fresh", now).await.unwrap();

        let removed = store
            .delete_signals_before(now - Duration::hours(24), &["COMPLETED"])
            .await
            .unwrap();

        assert_eq!(removed, 1);
        let keys: Vec<_> = store.list_signals("p").await.unwrap().into_iter().map(|s| s.key).collect();
        assert_eq!(keys, vec!["BLOCKER", "COMPLETED"]);
    }

    #[tokio::test]
    async fn test_history_newest_first_and_trim() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let start = Utc::now();
        for i in 0..4 {
            store
                .save_observation("p", "agent", &format!("obs {}", i), start + Duration::seconds(i))
                .await
                .unwrap();
        }

        let history = store.query_history("p", 2).await.unwrap();
        assert_eq!(history[0].content, "obs 3");
        assert_eq!(history.len(), 2);

        assert_eq!(store.trim_observations(1).await.unwrap(), 3);
        assert_eq!(store.query_history("p", 10).await.unwrap().len(), 1);
    }
}
