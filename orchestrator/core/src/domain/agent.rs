// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent and Monitor Lifecycle Types
//!
//! An *agent* is a named participant on the bus; a *monitor* is one running
//! instance of its runtime kernel. The supervisor owns one in-memory
//! [`MonitorRecord`] per launched monitor; records disappear on explicit
//! delete or supervisor shutdown, never on their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::registry::HandlerKind;

/// Monitor instance identifier: `<agent>_<handler>_<8 hex>`. Doubles as the
/// log file stem, so it only ever contains sanitised characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorId(String);

impl MonitorId {
    pub fn generate(agent: &str, kind: HandlerKind) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}_{}_{}",
            sanitize_agent_name(agent),
            kind.as_str(),
            &suffix[..8]
        ))
    }

    pub fn from_string(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MonitorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Replace anything outside `[A-Za-z0-9_-]` so agent names can never carry
/// path separators into log file names or subprocess arguments.
pub fn sanitize_agent_name(agent: &str) -> String {
    agent
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Static identity of an agent, loaded once at monitor start. Changing any
/// of it requires a restart.
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub name: String,
    /// Messaging endpoint of this agent's channel on the bus.
    pub bus: BusEndpoint,
    /// Names of MCP tool subservers the handler wants connected.
    pub tool_servers: Vec<String>,
    /// Environment tag ("local", "production", …) used for fleet filtering.
    pub environment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusEndpoint {
    /// Base URL of the agent channel, e.g. `http://localhost:8002/mcp/agents/alpha`.
    pub url: String,
    pub oauth_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Starting,
    Running,
    Paused,
    Stopped,
    Crashed,
}

impl MonitorStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, MonitorStatus::Starting | MonitorStatus::Running)
    }
}

/// Supervisor-owned record of one launched monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRecord {
    pub id: MonitorId,
    pub agent: String,
    pub handler_kind: HandlerKind,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub system_prompt_name: Option<String>,
    /// Resolved prompt text, kept for restarts; not part of snapshots.
    #[serde(skip)]
    pub system_prompt: Option<String>,
    pub status: MonitorStatus,
    pub started_at: DateTime<Utc>,
    pub pid: Option<u32>,
    pub deployment_group: Option<String>,
    pub environment: String,
    pub log_file: PathBuf,
    /// Last log line seen before a crash, surfaced in the fleet snapshot.
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_ids_embed_agent_and_handler() {
        let id = MonitorId::generate("lunar_craft_128", HandlerKind::Echo);
        assert!(id.as_str().starts_with("lunar_craft_128_echo_"));
        assert_eq!(id.as_str().len(), "lunar_craft_128_echo_".len() + 8);
    }

    #[test]
    fn sanitize_rejects_path_separators() {
        assert_eq!(sanitize_agent_name("../evil/name"), "___evil_name");
        assert_eq!(sanitize_agent_name("ok_name-42"), "ok_name-42");
    }
}
