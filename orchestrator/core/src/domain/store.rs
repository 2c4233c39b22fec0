// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message Store Interface
//!
//! Durable per-agent FIFO queue with deduplication and processing states.
//! The store is the only shared mutable resource between the tasks of one
//! agent runtime; writes are serialised per agent by the implementation,
//! reads may proceed concurrently.
//!
//! The production implementation lives in `infrastructure::message_store`
//! (single-file SQLite, write-ahead logged).

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::message::{EnqueueOutcome, Message, QueueStats};

/// Store failure taxonomy. `Busy` and `DiskFull` reads are transient and
/// retried by callers; `Corrupt` is fatal to the runtime and must reach the
/// operator through the fleet snapshot.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("message store busy: {0}")]
    Busy(String),

    #[error("message store corrupt: {0}")]
    Corrupt(String),

    #[error("disk full: {0}")]
    DiskFull(String),

    #[error("message store error: {0}")]
    Other(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}

/// Durable FIFO mention queue, scoped per recipient agent.
///
/// Ordering contract: claims drain Pending rows in `(arrived_at, id)` order.
/// At most one row per agent is Processing at any instant, and that holds
/// even if two processors are mistakenly running against the same agent.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Idempotent insert. `Accepted` rows start Pending with a freshly
    /// assigned arrival timestamp; an existing `(id, agent)` pair is a no-op
    /// reported as `Duplicate`.
    async fn enqueue(
        &self,
        id: &str,
        agent: &str,
        sender: &str,
        content: &str,
    ) -> Result<EnqueueOutcome, StoreError>;

    /// Oldest Pending row without mutating state.
    async fn peek_next(&self, agent: &str) -> Result<Option<Message>, StoreError>;

    /// Atomically select the oldest Pending row and transition it to
    /// Processing. Returns `None` when the queue is empty or another row is
    /// already Processing for this agent.
    async fn claim(&self, agent: &str) -> Result<Option<Message>, StoreError>;

    /// Peek up to `limit` additional Pending rows in FIFO order. Used for
    /// batch context after a claim; does not change any state.
    async fn peek_batch(&self, agent: &str, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// Processing → Completed.
    async fn complete(&self, id: &str, agent: &str) -> Result<(), StoreError>;

    /// Processing → Pending (original arrival time kept, so the row returns
    /// to the head of the queue) when `requeue`, otherwise Processing →
    /// Failed tombstone.
    async fn fail(&self, id: &str, agent: &str, requeue: bool) -> Result<(), StoreError>;

    /// Delete all Pending rows for the agent. Returns the purge count.
    async fn purge_pending(&self, agent: &str) -> Result<u64, StoreError>;

    /// Requeue rows stuck in Processing longer than `max_age` (crash
    /// recovery on runtime start). Returns the recovered count.
    async fn recover_stale(&self, agent: &str, max_age: Duration) -> Result<u64, StoreError>;

    /// Delete terminal tombstones older than `retention`, at most `max_rows`
    /// per pass so the sweep never starves ingress.
    async fn sweep_completed(&self, retention: Duration, max_rows: u64)
        -> Result<u64, StoreError>;

    /// Last `limit` Completed rows, oldest first. Failed tombstones are
    /// excluded: a reply that never happened is not conversation context.
    async fn history(&self, agent: &str, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// Age of the row currently Processing, if any. The supervisor watchdog
    /// uses this to spot handlers that stopped making progress.
    async fn processing_age(&self, agent: &str) -> Result<Option<Duration>, StoreError>;

    async fn stats(&self, agent: &str) -> Result<QueueStats, StoreError>;
}
