// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Log Multiplexer
//!
//! In-memory fan-out of captured monitor output to control-plane
//! subscribers, built on a tokio broadcast channel. Lossy by design: slow
//! WebSocket consumers drop old lines instead of backpressuring the
//! supervisor. The durable copy is the per-monitor log file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// One captured stdout/stderr line of a monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub runtime_id: String,
    pub line: String,
    pub is_verbose: bool,
    pub at: DateTime<Utc>,
}

impl LogLine {
    pub fn new(runtime_id: impl Into<String>, line: impl Into<String>) -> Self {
        let line = line.into();
        let is_verbose = is_verbose_line(&line);
        Self {
            runtime_id: runtime_id.into(),
            line,
            is_verbose,
            at: Utc::now(),
        }
    }
}

/// Debug/trace chatter the dashboard hides behind a toggle.
fn is_verbose_line(line: &str) -> bool {
    line.contains(" DEBUG ") || line.contains(" TRACE ") || line.starts_with("DEBUG")
}

#[derive(Clone)]
pub struct LogMultiplexer {
    sender: Arc<broadcast::Sender<LogLine>>,
}

impl LogMultiplexer {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish(&self, line: LogLine) {
        // An error only means nobody is subscribed right now.
        let _ = self.sender.send(line);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LogMultiplexer {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}
