// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Connection Pool
//!
//! Wraps `sqlx::SqlitePool` in a thin `Database` newtype injected into the
//! message store. The store is a single file, write-ahead logged, so one
//! supervisor and its monitor subprocesses can share it safely.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

use crate::domain::store::StoreError;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the store file with WAL journaling and a
    /// busy timeout, so concurrent writers back off instead of failing.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Other(format!("create data dir: {e}")))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        Ok(Self { pool })
    }

    /// In-memory database for tests. A single pooled connection keeps the
    /// database alive for the pool's lifetime.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new().in_memory(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(map_sqlx_error)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Translate sqlx failures into the store taxonomy. `Busy` is transient and
/// retried by callers; corruption must surface to the operator.
pub(crate) fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            let lowered = message.to_ascii_lowercase();
            if lowered.contains("locked") || lowered.contains("busy") {
                StoreError::Busy(message)
            } else if lowered.contains("disk is full") || lowered.contains("disk full") {
                StoreError::DiskFull(message)
            } else if lowered.contains("malformed")
                || lowered.contains("corrupt")
                || lowered.contains("not a database")
            {
                StoreError::Corrupt(message)
            } else {
                StoreError::Other(message)
            }
        }
        sqlx::Error::PoolTimedOut => StoreError::Busy("connection pool exhausted".to_string()),
        _ => StoreError::Other(error.to_string()),
    }
}
