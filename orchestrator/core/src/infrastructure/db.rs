// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Store Connection Pools
//!
//! Opens the SQLite or PostgreSQL pool behind the coordination store and
//! applies the embedded migrations before anything else touches it. A
//! migration failure aborts startup.
//!
//! SQLite runs in WAL mode with a 5 second busy timeout so several agent
//! processes on one host can share the file.

use anyhow::{Context, Result};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub static SQLITE_MIGRATOR: Migrator = sqlx::migrate!("./migrations/sqlite");
pub static POSTGRES_MIGRATOR: Migrator = sqlx::migrate!("./migrations/postgres");

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub enum Database {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

impl Database {
    /// Open (creating if needed) a SQLite database. `url` is either a
    /// `sqlite:` URL or a plain file path.
    pub async fn sqlite(url: &str, max_connections: u32) -> Result<Self> {
        let options = if url.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(url)
                .with_context(|| format!("Invalid SQLite URL '{}'", url))?
        } else {
            SqliteConnectOptions::new().filename(url)
        }
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(SQLITE_BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite database '{}'", url))?;

        SQLITE_MIGRATOR
            .run(&pool)
            .await
            .context("Failed to apply SQLite migrations")?;
        debug!(url, "SQLite store ready");

        Ok(Self::Sqlite(pool))
    }

    pub async fn postgres(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        POSTGRES_MIGRATOR
            .run(&pool)
            .await
            .context("Failed to apply PostgreSQL migrations")?;
        debug!("PostgreSQL store ready");

        Ok(Self::Postgres(pool))
    }

    pub async fn close(&self) {
        match self {
            Database::Sqlite(pool) => pool.close().await,
            Database::Postgres(pool) => pool.close().await,
        }
    }
}
