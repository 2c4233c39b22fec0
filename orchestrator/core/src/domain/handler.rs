// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Handler Contract
//!
//! A handler turns a trigger mention into a response. Inputs are pure data;
//! handlers never hold references into kernel internals and may take
//! arbitrary wall-clock time (the supervisor watchdog, not the processor,
//! bounds them). Returning `None` abstains: the trigger is completed with no
//! outgoing message.

use async_trait::async_trait;

use crate::domain::message::Message;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),

    #[error("handler misconfigured: {0}")]
    Configuration(String),
}

/// The pluggable processing function of an agent.
///
/// * `trigger` — the claimed message, head of the current batch.
/// * `batch` — additional Pending mentions drained as context in the same
///   cycle. They are subsumed by the one reply to the trigger.
/// * `history` — recent Completed mentions, oldest first, as conversation
///   context.
///
/// Handlers must be reentrant across distinct runtimes but need not be
/// thread-safe for themselves; the processor invokes one call at a time.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(
        &self,
        trigger: &Message,
        batch: &[Message],
        history: &[Message],
    ) -> Result<Option<String>, HandlerError>;
}
