// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Monitor Launcher Interface
//!
//! The supervisor starts monitors through this seam so tests can substitute
//! a fake. The production implementation (`infrastructure::process`) spawns
//! the `aviary monitor` subprocess, tees its output and reports lifecycle
//! events back on a channel.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::domain::agent::MonitorId;
use crate::domain::registry::HandlerKind;

/// Everything needed to launch one monitor process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub monitor_id: MonitorId,
    pub agent: String,
    pub handler_kind: HandlerKind,
    pub config_path: PathBuf,
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Resolved prompt text, passed to the child via environment.
    pub system_prompt: Option<String>,
    /// When false the backlog is reset before the monitor starts polling.
    pub process_backlog: bool,
    pub log_file: PathBuf,
}

/// Lifecycle events of a launched monitor, in arrival order. `Exited` is
/// always last.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// The runtime finished startup and is polling.
    Ready,
    /// One captured stdout/stderr line.
    Log { line: String, is_verbose: bool },
    /// Process exit. `code` of 0 is a normal stop, 130 a signal-cancelled
    /// stop, anything else a crash; `None` means killed before exiting.
    Exited { code: Option<i32> },
}

pub struct LaunchedMonitor {
    pub pid: u32,
    pub events: mpsc::Receiver<MonitorEvent>,
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to spawn monitor: {0}")]
    Spawn(String),

    #[error("monitor is not tracked: {0}")]
    NotFound(MonitorId),

    #[error("signal delivery failed: {0}")]
    Signal(String),

    #[error("launcher I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Spawns and terminates monitor processes.
#[async_trait]
pub trait MonitorLauncher: Send + Sync {
    async fn launch(&self, spec: LaunchSpec) -> Result<LaunchedMonitor, LaunchError>;

    /// Cooperative stop: deliver the shutdown signal, wait up to `grace`,
    /// then terminate forcibly. Returns false when the monitor was already
    /// gone.
    async fn stop(&self, id: &MonitorId, grace: Duration) -> Result<bool, LaunchError>;

    /// Forcible termination, no grace.
    async fn kill(&self, id: &MonitorId) -> Result<bool, LaunchError>;
}
