// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Bus Client Interface (Anti-Corruption Layer)
//!
//! One logical connection per agent to the external MCP message bus. The
//! kernel is a client; the wire protocol is fixed upstream. Three operations
//! are all the kernel needs: long-poll receive, threaded send, and a cheap
//! liveness ping that must never disturb an in-flight receive.
//!
//! Implementations must make `receive` cancellable: dropping the future has
//! to return promptly without consuming a message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A directed message surfaced by the bus before it is accepted into the
/// local queue. `content` still carries the raw `@mention` text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: String,
    pub sender: String,
    pub content: String,
}

/// Bus failure taxonomy.
///
/// Transient errors (rate limit, connection reset, timeout mid-poll) are
/// retried with backoff and never reach a handler. Fatal errors (auth
/// rejected, malformed endpoint) crash the runtime; the supervisor records
/// it and does not restart automatically.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("transient bus error: {reason}")]
    Transient {
        reason: String,
        /// Server-provided retry hint (HTTP 429 `Retry-After`), honoured by
        /// the backoff policy when present.
        retry_after: Option<Duration>,
    },

    #[error("fatal bus error: {0}")]
    Fatal(String),
}

impl BusError {
    pub fn transient(reason: impl Into<String>) -> Self {
        BusError::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::Transient { .. })
    }
}

/// Per-agent connection to the MCP message bus.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// The agent this client publishes and polls as.
    fn agent(&self) -> &str;

    /// Publish `content` as this agent. When `parent_id` is given the
    /// message is threaded under it. Returns the bus-assigned id of the new
    /// message when the bus reports one.
    async fn send(&self, content: &str, parent_id: Option<&str>)
        -> Result<Option<String>, BusError>;

    /// Fetch `@agent`-directed messages. With `wait` the call long-polls
    /// until at least one mention is available or the server default timeout
    /// elapses (an empty batch, not an error). `mark_read` tells the bus not
    /// to surface the same messages again; the deduplicating store makes it
    /// safe either way.
    async fn receive(
        &self,
        wait: bool,
        limit: Option<u32>,
        mark_read: bool,
    ) -> Result<Vec<IncomingMessage>, BusError>;

    /// Protocol-level liveness probe. Independent of `receive`: pinging must
    /// neither disturb nor unblock a poll in flight.
    async fn ping(&self) -> Result<(), BusError>;

    /// Drop the current session and re-initialise. Called by the heartbeat
    /// task after repeated ping failures.
    async fn reconnect(&self) -> Result<(), BusError>;
}

/// Builds bus clients outside a runtime, for operations that act on behalf
/// of an agent that is not running (backlog drain, test messages).
pub trait BusClientFactory: Send + Sync {
    fn client_for(&self, agent: &str) -> Result<Arc<dyn BusClient>, BusError>;
}
