// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message Queue Entities
//!
//! A [`Message`] is one `@mention` accepted into an agent's durable queue.
//! The same bus message addressed to several agents exists as independent
//! rows; the primary key is the pair `(id, agent)`.
//!
//! Lifecycle: `Pending → Processing → Completed | Failed`. Terminal rows are
//! tombstones kept for deduplication and conversation history until the
//! retention sweep removes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue state of a stored mention.
///
/// `Failed` is the completed-with-failure tombstone: terminal like
/// `Completed`, counted the same way by dedup and retention, but excluded
/// from conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Pending => "pending",
            MessageState::Processing => "processing",
            MessageState::Completed => "completed",
            MessageState::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(MessageState::Pending),
            "processing" => Some(MessageState::Processing),
            "completed" => Some(MessageState::Completed),
            "failed" => Some(MessageState::Failed),
            _ => None,
        }
    }

    /// Terminal states are never claimed again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageState::Completed | MessageState::Failed)
    }
}

/// One `@mention` in an agent's queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Bus-assigned message id, unique on the bus. Queue identity is `(id, agent)`.
    pub id: String,
    /// Recipient agent name (the scoping key of the queue).
    pub agent: String,
    /// Agent or human that produced the message.
    pub sender: String,
    /// Raw mention text, `@mention` and `#command` tokens included.
    pub content: String,
    /// Arrival time assigned by the kernel on enqueue, not the bus send time.
    /// FIFO order is `(arrived_at, id)`.
    pub arrived_at: DateTime<Utc>,
    pub state: MessageState,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Message {
    /// The mention body with the leading `@recipient` token removed, which is
    /// what handlers usually want to respond to.
    pub fn mention_body(&self) -> &str {
        let trimmed = self.content.trim_start();
        let mention = format!("@{}", self.agent);
        if let Some(rest) = trimmed.strip_prefix(&mention) {
            rest.trim_start()
        } else {
            trimmed
        }
    }
}

/// Result of an enqueue attempt. Enqueue is idempotent on `(id, agent)`:
/// re-inserting an existing pair is reported, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    Duplicate,
}

/// Per-agent queue statistics for the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed_last_24h: u64,
    pub failed: u64,
    /// Mean wall-clock milliseconds from claim to completion, when known.
    pub avg_process_ms: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_strings() {
        for state in [
            MessageState::Pending,
            MessageState::Processing,
            MessageState::Completed,
            MessageState::Failed,
        ] {
            assert_eq!(MessageState::parse(state.as_str()), Some(state));
        }
        assert_eq!(MessageState::parse("bogus"), None);
    }

    #[test]
    fn mention_body_strips_the_leading_mention_only() {
        let msg = Message {
            id: "m1".into(),
            agent: "alpha".into(),
            sender: "bob".into(),
            content: "@alpha hello @beta".into(),
            arrived_at: Utc::now(),
            state: MessageState::Pending,
            started_at: None,
            completed_at: None,
        };
        assert_eq!(msg.mention_body(), "hello @beta");
    }
}
