// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # SQLite Message Store
//!
//! Production [`MessageStore`] backed by the single-file WAL database at
//! `<data-dir>/message_backlog.db`.
//!
//! Schema:
//!
//! ```sql
//! CREATE TABLE messages (
//!     id           TEXT NOT NULL,
//!     agent        TEXT NOT NULL,
//!     sender       TEXT NOT NULL,
//!     content      TEXT NOT NULL,
//!     arrived_at   INTEGER NOT NULL,   -- ms since epoch, kernel-assigned
//!     state        TEXT NOT NULL,
//!     started_at   INTEGER,
//!     completed_at INTEGER,
//!     PRIMARY KEY (id, agent)
//! );
//! ```
//!
//! The claim is one `UPDATE … RETURNING` guarded by a `NOT EXISTS` on other
//! Processing rows, so even two processors mistakenly running against the
//! same agent can never take the same Pending row or hold two claims.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::time::Duration;

use crate::domain::message::{EnqueueOutcome, Message, MessageState, QueueStats};
use crate::domain::store::{MessageStore, StoreError};
use crate::infrastructure::db::{map_sqlx_error, Database};

const CREATE_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id           TEXT NOT NULL,
    agent        TEXT NOT NULL,
    sender       TEXT NOT NULL,
    content      TEXT NOT NULL,
    arrived_at   INTEGER NOT NULL,
    state        TEXT NOT NULL DEFAULT 'pending',
    started_at   INTEGER,
    completed_at INTEGER,
    PRIMARY KEY (id, agent)
)
"#;

const CREATE_QUEUE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_agent_state_arrived
ON messages (agent, state, arrived_at)
"#;

pub struct SqliteMessageStore {
    db: Database,
}

impl SqliteMessageStore {
    pub async fn new(db: Database) -> Result<Self, StoreError> {
        sqlx::query(CREATE_MESSAGES)
            .execute(db.pool())
            .await
            .map_err(map_sqlx_error)?;
        sqlx::query(CREATE_QUEUE_INDEX)
            .execute(db.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self { db })
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn datetime_from_ms(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {ms}")))
}

fn row_to_message(row: &SqliteRow) -> Result<Message, StoreError> {
    let state_raw: String = row.get("state");
    let state = MessageState::parse(&state_raw)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown message state: {state_raw}")))?;

    let started_at: Option<i64> = row.get("started_at");
    let completed_at: Option<i64> = row.get("completed_at");

    Ok(Message {
        id: row.get("id"),
        agent: row.get("agent"),
        sender: row.get("sender"),
        content: row.get("content"),
        arrived_at: datetime_from_ms(row.get("arrived_at"))?,
        state,
        started_at: started_at.map(datetime_from_ms).transpose()?,
        completed_at: completed_at.map(datetime_from_ms).transpose()?,
    })
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn enqueue(
        &self,
        id: &str,
        agent: &str,
        sender: &str,
        content: &str,
    ) -> Result<EnqueueOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO messages (id, agent, sender, content, arrived_at, state)
            VALUES (?1, ?2, ?3, ?4, ?5, 'pending')
            ON CONFLICT (id, agent) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(agent)
        .bind(sender)
        .bind(content)
        .bind(now_ms())
        .execute(self.db.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 1 {
            Ok(EnqueueOutcome::Accepted)
        } else {
            Ok(EnqueueOutcome::Duplicate)
        }
    }

    async fn peek_next(&self, agent: &str) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, agent, sender, content, arrived_at, state, started_at, completed_at
            FROM messages
            WHERE agent = ?1 AND state = 'pending'
            ORDER BY arrived_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(agent)
        .fetch_optional(self.db.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(row_to_message).transpose()
    }

    async fn claim(&self, agent: &str) -> Result<Option<Message>, StoreError> {
        // Single-statement claim: the inner SELECT picks the FIFO head, the
        // NOT EXISTS guard holds the one-Processing-row-per-agent invariant
        // against competing claimants.
        let row = sqlx::query(
            r#"
            UPDATE messages
            SET state = 'processing', started_at = ?1
            WHERE agent = ?2
              AND state = 'pending'
              AND NOT EXISTS (
                  SELECT 1 FROM messages WHERE agent = ?2 AND state = 'processing'
              )
              AND id = (
                  SELECT id FROM messages
                  WHERE agent = ?2 AND state = 'pending'
                  ORDER BY arrived_at ASC, id ASC
                  LIMIT 1
              )
            RETURNING id, agent, sender, content, arrived_at, state, started_at, completed_at
            "#,
        )
        .bind(now_ms())
        .bind(agent)
        .fetch_optional(self.db.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(row_to_message).transpose()
    }

    async fn peek_batch(&self, agent: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT id, agent, sender, content, arrived_at, state, started_at, completed_at
            FROM messages
            WHERE agent = ?1 AND state = 'pending'
            ORDER BY arrived_at ASC, id ASC
            LIMIT ?2
            "#,
        )
        .bind(agent)
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(row_to_message).collect()
    }

    async fn complete(&self, id: &str, agent: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET state = 'completed', completed_at = ?1
            WHERE id = ?2 AND agent = ?3 AND state IN ('processing', 'pending')
            "#,
        )
        .bind(now_ms())
        .bind(id)
        .bind(agent)
        .execute(self.db.pool())
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            tracing::warn!(id, agent, "complete() on a row that was not in flight");
        }
        Ok(())
    }

    async fn fail(&self, id: &str, agent: &str, requeue: bool) -> Result<(), StoreError> {
        let query = if requeue {
            // Arrival time untouched: the row goes back to the head of the
            // queue.
            sqlx::query(
                r#"
                UPDATE messages
                SET state = 'pending', started_at = NULL
                WHERE id = ?1 AND agent = ?2 AND state = 'processing'
                "#,
            )
            .bind(id)
            .bind(agent)
        } else {
            sqlx::query(
                r#"
                UPDATE messages
                SET state = 'failed', completed_at = ?1
                WHERE id = ?2 AND agent = ?3 AND state = 'processing'
                "#,
            )
            .bind(now_ms())
            .bind(id)
            .bind(agent)
        };

        let result = query.execute(self.db.pool()).await.map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            tracing::warn!(id, agent, requeue, "fail() on a row that was not Processing");
        }
        Ok(())
    }

    async fn purge_pending(&self, agent: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE agent = ?1 AND state = 'pending'")
            .bind(agent)
            .execute(self.db.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn recover_stale(&self, agent: &str, max_age: Duration) -> Result<u64, StoreError> {
        let cutoff = now_ms() - max_age.as_millis() as i64;
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET state = 'pending', started_at = NULL
            WHERE agent = ?1 AND state = 'processing' AND started_at < ?2
            "#,
        )
        .bind(agent)
        .bind(cutoff)
        .execute(self.db.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn sweep_completed(
        &self,
        retention: Duration,
        max_rows: u64,
    ) -> Result<u64, StoreError> {
        let cutoff = now_ms() - retention.as_millis() as i64;
        // Bounded per pass so retention never starves ingress.
        let result = sqlx::query(
            r#"
            DELETE FROM messages
            WHERE rowid IN (
                SELECT rowid FROM messages
                WHERE state IN ('completed', 'failed')
                  AND completed_at IS NOT NULL
                  AND completed_at < ?1
                LIMIT ?2
            )
            "#,
        )
        .bind(cutoff)
        .bind(max_rows as i64)
        .execute(self.db.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn history(&self, agent: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, agent, sender, content, arrived_at, state, started_at, completed_at
            FROM messages
            WHERE agent = ?1 AND state = 'completed'
            ORDER BY arrived_at DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(agent)
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .map_err(map_sqlx_error)?;

        let mut messages = rows
            .iter()
            .map(row_to_message)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn processing_age(&self, agent: &str) -> Result<Option<Duration>, StoreError> {
        let started: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT started_at FROM messages
            WHERE agent = ?1 AND state = 'processing' AND started_at IS NOT NULL
            ORDER BY started_at ASC
            LIMIT 1
            "#,
        )
        .bind(agent)
        .fetch_optional(self.db.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(started.map(|ms| {
            let age_ms = (now_ms() - ms).max(0);
            Duration::from_millis(age_ms as u64)
        }))
    }

    async fn stats(&self, agent: &str) -> Result<QueueStats, StoreError> {
        let day_ago = now_ms() - 24 * 3600 * 1000;
        let row = sqlx::query(
            r#"
            SELECT
                SUM(CASE WHEN state = 'pending' THEN 1 ELSE 0 END)    AS pending,
                SUM(CASE WHEN state = 'processing' THEN 1 ELSE 0 END) AS processing,
                SUM(CASE WHEN state IN ('completed', 'failed')
                          AND completed_at >= ?1 THEN 1 ELSE 0 END)   AS completed_last_24h,
                SUM(CASE WHEN state = 'failed' THEN 1 ELSE 0 END)     AS failed,
                AVG(CASE WHEN completed_at IS NOT NULL AND started_at IS NOT NULL
                         THEN completed_at - started_at END)          AS avg_process_ms
            FROM messages
            WHERE agent = ?2
            "#,
        )
        .bind(day_ago)
        .bind(agent)
        .fetch_one(self.db.pool())
        .await
        .map_err(map_sqlx_error)?;

        let get_count = |name: &str| -> u64 {
            row.get::<Option<i64>, _>(name).unwrap_or(0).max(0) as u64
        };

        Ok(QueueStats {
            pending: get_count("pending"),
            processing: get_count("processing"),
            completed_last_24h: get_count("completed_last_24h"),
            failed: get_count("failed"),
            avg_process_ms: row.get::<Option<f64>, _>("avg_process_ms"),
        })
    }
}
