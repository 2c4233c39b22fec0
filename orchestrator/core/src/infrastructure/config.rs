// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Studio Configuration
//!
//! Process-level configuration for the supervisor and monitors: directories,
//! bus defaults and queue tunables. Loaded from `aviary.yaml` (explicit path,
//! `AVIARY_CONFIG` env, or the working directory), with environment-variable
//! overrides for the deployment-sensitive values. Every field has a default
//! so a bare checkout runs against a local bus.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub configs_dir: PathBuf,
    pub bus: BusConfig,
    pub queue: QueueConfig,
    pub supervisor: SupervisorConfig,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
            configs_dir: PathBuf::from("configs"),
            bus: BusConfig::default(),
            queue: QueueConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub server_url: String,
    pub oauth_url: String,
    pub max_attempts: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8002".to_string(),
            oauth_url: "http://localhost:8001".to_string(),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Max messages handled in one processing cycle (trigger + context).
    pub batch_size: usize,
    /// Completed messages supplied to handlers as conversation history.
    pub history_limit: usize,
    /// Idle sleep between queue checks, milliseconds.
    pub poll_interval_ms: u64,
    /// Seconds between keep-alive pings; 0 disables the heartbeat.
    pub heartbeat_interval_secs: u64,
    /// Fetch unread backlog before the poller starts.
    pub startup_sweep: bool,
    /// Max messages fetched by the startup sweep; 0 means unlimited.
    pub startup_sweep_limit: usize,
    /// Cool-down after a `#done` command, seconds.
    pub done_pause_secs: u64,
    /// Processing rows older than this are requeued at start, seconds.
    pub stale_claim_secs: u64,
    /// Completed tombstones are kept this many days.
    pub retention_days: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            history_limit: 25,
            poll_interval_ms: 100,
            heartbeat_interval_secs: 240,
            startup_sweep: true,
            startup_sweep_limit: 10,
            done_pause_secs: 60,
            stale_claim_secs: 300,
            retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Seconds to wait for a launched monitor's ready line.
    pub startup_grace_secs: u64,
    /// Seconds between the cooperative stop signal and the forced kill.
    pub stop_grace_secs: u64,
    /// A runtime with no store progress for this long is killed, seconds.
    pub handler_timeout_secs: u64,
    /// Upper bound on remote-drain iterations during a backlog reset.
    pub max_drain_iterations: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_grace_secs: 30,
            stop_grace_secs: 10,
            handler_timeout_secs: 600,
            max_drain_iterations: 200,
        }
    }
}

impl StudioConfig {
    /// Explicit path, then `AVIARY_CONFIG`, then `./aviary.yaml`, then
    /// defaults. An explicit path that does not exist is an error; a missing
    /// discovered file is not.
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!(path = %path.display(), "loading configuration");
            Self::from_yaml_file(&path)
                .with_context(|| format!("failed to load config at {}", path.display()))?
        } else if let Some(path) = Self::discover() {
            tracing::info!(path = %path.display(), "loading discovered configuration");
            Self::from_yaml_file(&path)
                .with_context(|| format!("failed to load config at {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn discover() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("AVIARY_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }
        let cwd = PathBuf::from("aviary.yaml");
        cwd.exists().then_some(cwd)
    }

    fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("AVIARY_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("AVIARY_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("AVIARY_CONFIGS_DIR") {
            self.configs_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("AVIARY_BUS_URL") {
            self.bus.server_url = url;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue.batch_size == 0 {
            anyhow::bail!("queue.batch_size must be at least 1");
        }
        if self.bus.server_url.is_empty() {
            anyhow::bail!("bus.server_url must not be empty");
        }
        if self.supervisor.stop_grace_secs == 0 {
            anyhow::bail!("supervisor.stop_grace_secs must be at least 1");
        }
        Ok(())
    }

    pub fn message_store_path(&self) -> PathBuf {
        self.data_dir.join("message_backlog.db")
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.queue.heartbeat_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.queue.retention_days * 24 * 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = StudioConfig::default();
        config.validate().unwrap();
        assert_eq!(config.queue.batch_size, 10);
        assert_eq!(config.queue.heartbeat_interval_secs, 240);
        assert_eq!(
            config.message_store_path(),
            PathBuf::from("data/message_backlog.db")
        );
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config: StudioConfig =
            serde_yaml::from_str("queue:\n  batch_size: 3\nbus:\n  server_url: http://bus:9\n")
                .unwrap();
        assert_eq!(config.queue.batch_size, 3);
        assert_eq!(config.queue.history_limit, 25);
        assert_eq!(config.bus.server_url, "http://bus:9");
        assert_eq!(config.bus.max_attempts, 5);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut config = StudioConfig::default();
        config.queue.batch_size = 0;
        assert!(config.validate().is_err());
    }
}
