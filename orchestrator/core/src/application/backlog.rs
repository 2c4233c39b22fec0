// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Backlog Reset
//!
//! Clears an agent's queue on both sides: Pending rows in the local store,
//! and unread mentions still sitting on the bus. The remote drain fetches
//! one message at a time with `mark_read`, paced under the bus rate limit
//! and bounded by `max_iterations` so a misbehaving server cannot trap it.
//! Only permitted while the agent has no running monitor; the supervisor
//! enforces that.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::bus::BusClientFactory;
use crate::domain::store::MessageStore;

/// Pacing between drain requests, ~85/minute.
const DRAIN_PACING: Duration = Duration::from_millis(700);

#[derive(Debug, Clone, Serialize)]
pub struct ResetSummary {
    pub agent: String,
    pub local_cleared: u64,
    pub remote_cleared: u64,
    pub errors: Vec<String>,
}

pub struct BacklogService {
    store: Arc<dyn MessageStore>,
    bus_factory: Arc<dyn BusClientFactory>,
    max_iterations: u32,
}

impl BacklogService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        bus_factory: Arc<dyn BusClientFactory>,
        max_iterations: u32,
    ) -> Self {
        Self {
            store,
            bus_factory,
            max_iterations,
        }
    }

    /// Purge the local queue and drain the remote one. Partial failures are
    /// collected, not fatal: a reset that only cleared one side still
    /// reports what it did.
    pub async fn reset_agent(&self, agent: &str) -> ResetSummary {
        let mut summary = ResetSummary {
            agent: agent.to_string(),
            local_cleared: 0,
            remote_cleared: 0,
            errors: Vec::new(),
        };

        match self.store.purge_pending(agent).await {
            Ok(cleared) => summary.local_cleared = cleared,
            Err(e) => summary.errors.push(format!("local: {e}")),
        }

        let client = match self.bus_factory.client_for(agent) {
            Ok(client) => client,
            Err(e) => {
                summary.errors.push(format!("remote: {e}"));
                return summary;
            }
        };

        for iteration in 0..self.max_iterations {
            if iteration > 0 {
                tokio::time::sleep(DRAIN_PACING).await;
            }
            match client.receive(false, Some(1), true).await {
                Ok(messages) if messages.is_empty() => break,
                Ok(messages) => summary.remote_cleared += messages.len() as u64,
                Err(e) => {
                    summary.errors.push(format!("remote: {e}"));
                    break;
                }
            }
        }

        if summary.errors.is_empty() {
            tracing::info!(
                agent,
                local = summary.local_cleared,
                remote = summary.remote_cleared,
                "backlog reset"
            );
        } else {
            tracing::warn!(
                agent,
                errors = ?summary.errors,
                "backlog reset finished with warnings"
            );
        }

        summary
    }
}
