// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Configuration Files
//!
//! One JSON file per agent at `configs/agents/<name>.json`:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "ax-gcp": {"command": "npx", "args": ["-y", "mcp-remote", "https://bus…/mcp/agents/alpha", "--oauth-server", "https://auth…"]}
//!   },
//!   "permissions": {…},
//!   "environment": "production"
//! }
//! ```
//!
//! The kernel reads three things out of it: the messaging endpoint (first
//! http(s) URL of the primary server's args that is not an `--oauth-server`
//! value), the OAuth server, and the environment tag. `permissions` is
//! handler-specific and opaque here.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::domain::agent::{AgentIdentity, BusEndpoint};

#[derive(Debug, Clone, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    // BTreeMap keeps primary-server selection deterministic.
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    #[serde(default)]
    pub permissions: serde_json::Value,
    #[serde(default)]
    pub environment: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentConfigError {
    #[error("agent config not found: {0}")]
    NotFound(PathBuf),

    #[error("agent config unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("agent config invalid: {0}")]
    Invalid(#[from] serde_json::Error),
}

impl AgentConfig {
    pub fn path_for(configs_dir: &Path, agent: &str) -> PathBuf {
        configs_dir.join("agents").join(format!("{agent}.json"))
    }

    pub fn load(configs_dir: &Path, agent: &str) -> Result<Self, AgentConfigError> {
        Self::load_path(&Self::path_for(configs_dir, agent))
    }

    pub fn load_path(path: &Path) -> Result<Self, AgentConfigError> {
        if !path.exists() {
            return Err(AgentConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// The server carrying the agent's message channel: an `ax-`-prefixed
    /// entry when present, otherwise the first one.
    pub fn primary_server(&self) -> Option<(&String, &McpServerConfig)> {
        self.mcp_servers
            .iter()
            .find(|(name, _)| name.starts_with("ax-"))
            .or_else(|| self.mcp_servers.iter().next())
    }

    /// Messaging endpoint per the primary server's args. Falls back to
    /// `<default-server>/mcp/agents/<agent>` when the config carries no
    /// usable URL.
    pub fn bus_endpoint(&self, agent: &str, default_server_url: &str) -> BusEndpoint {
        let fallback = || BusEndpoint {
            url: format!(
                "{}/mcp/agents/{agent}",
                default_server_url.trim_end_matches('/')
            ),
            oauth_url: None,
        };

        let Some((_, server)) = self.primary_server() else {
            return fallback();
        };

        let mut url = None;
        let mut oauth_url = None;
        for (i, arg) in server.args.iter().enumerate() {
            if !(arg.starts_with("http://") || arg.starts_with("https://")) {
                continue;
            }
            if i > 0 && server.args[i - 1] == "--oauth-server" {
                oauth_url = Some(arg.clone());
            } else if url.is_none() {
                url = Some(arg.clone());
            }
        }

        match url {
            Some(url) => BusEndpoint { url, oauth_url },
            None => fallback(),
        }
    }

    /// Explicit tag when present, otherwise derived from whether the
    /// endpoint points at localhost.
    pub fn environment(&self, agent: &str, default_server_url: &str) -> String {
        if let Some(tag) = &self.environment {
            return tag.clone();
        }
        let endpoint = self.bus_endpoint(agent, default_server_url);
        if endpoint.url.contains("localhost") || endpoint.url.contains("127.0.0.1") {
            "local".to_string()
        } else {
            "production".to_string()
        }
    }

    pub fn tool_server_names(&self) -> Vec<String> {
        self.mcp_servers.keys().cloned().collect()
    }

    pub fn identity(&self, agent: &str, default_server_url: &str) -> AgentIdentity {
        AgentIdentity {
            name: agent.to_string(),
            bus: self.bus_endpoint(agent, default_server_url),
            tool_servers: self.tool_server_names(),
            environment: self.environment(agent, default_server_url),
        }
    }
}

/// Agents that have a config file, with their environment tags. Used for
/// bulk backlog resets scoped to an environment.
pub fn list_configured_agents(
    configs_dir: &Path,
    default_server_url: &str,
) -> Vec<(String, String)> {
    let agents_dir = configs_dir.join("agents");
    let Ok(entries) = std::fs::read_dir(&agents_dir) else {
        return Vec::new();
    };

    let mut agents = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        match AgentConfig::load(configs_dir, name) {
            Ok(config) => {
                let environment = config.environment(name, default_server_url);
                agents.push((name.to_string(), environment));
            }
            Err(e) => tracing::warn!(agent = name, error = %e, "skipping unreadable agent config"),
        }
    }
    agents.sort();
    agents
}
