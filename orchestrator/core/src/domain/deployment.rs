// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Deployment Groups
//!
//! A deployment group is a named bundle of agents started or stopped as a
//! unit. Groups are configuration-only: defaults at the group level, member
//! overrides per agent. Starting a group tolerates individual failures and
//! reports a per-agent result list.

use serde::{Deserialize, Serialize};

use crate::domain::registry::HandlerKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// "any" (default) makes the group available in every environment.
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub defaults: MemberSettings,
    #[serde(default)]
    pub agents: Vec<GroupMember>,
}

fn default_environment() -> String {
    "any".to_string()
}

impl DeploymentGroup {
    pub fn available_in(&self, environment: &str) -> bool {
        self.environment == "any" || self.environment == environment
    }

    /// Member settings with group defaults filled in.
    pub fn resolve(&self, member: &GroupMember) -> ResolvedMember {
        let overrides = &member.overrides;
        let defaults = &self.defaults;
        ResolvedMember {
            agent: member.id.clone(),
            handler_kind: overrides
                .handler
                .or(defaults.handler)
                .unwrap_or(HandlerKind::Graph),
            provider: overrides
                .provider
                .clone()
                .or_else(|| defaults.provider.clone()),
            model: overrides.model.clone().or_else(|| defaults.model.clone()),
            system_prompt: overrides
                .system_prompt
                .clone()
                .or_else(|| defaults.system_prompt.clone()),
            start_delay_ms: overrides.start_delay_ms.or(defaults.start_delay_ms),
            process_backlog: overrides
                .process_backlog
                .or(defaults.process_backlog)
                .unwrap_or(true),
        }
    }
}

/// Settings that may appear as group defaults or as member overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberSettings {
    #[serde(default, rename = "monitor")]
    pub handler: Option<HandlerKind>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub start_delay_ms: Option<u64>,
    #[serde(default)]
    pub process_backlog: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    /// Agent name.
    pub id: String,
    #[serde(flatten)]
    pub overrides: MemberSettings,
}

/// Effective launch settings for one member after merging defaults.
#[derive(Debug, Clone)]
pub struct ResolvedMember {
    pub agent: String,
    pub handler_kind: HandlerKind,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub start_delay_ms: Option<u64>,
    pub process_backlog: bool,
}

/// Read side of the deployment-group configuration.
pub trait DeploymentCatalog: Send + Sync {
    fn get(&self, id: &str) -> Option<DeploymentGroup>;

    fn list(&self, environment: Option<&str>) -> Vec<DeploymentGroup>;

    /// Re-read the backing configuration from disk.
    fn reload(&self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_overrides_beat_group_defaults() {
        let group = DeploymentGroup {
            id: "scrum".into(),
            name: "Scrum team".into(),
            description: String::new(),
            environment: "any".into(),
            tags: vec![],
            defaults: MemberSettings {
                handler: Some(HandlerKind::Graph),
                provider: Some("openai".into()),
                model: Some("gpt-4o-mini".into()),
                system_prompt: None,
                start_delay_ms: Some(500),
                process_backlog: Some(false),
            },
            agents: vec![GroupMember {
                id: "po_agent".into(),
                overrides: MemberSettings {
                    model: Some("gpt-4o".into()),
                    ..Default::default()
                },
            }],
        };

        let resolved = group.resolve(&group.agents[0]);
        assert_eq!(resolved.handler_kind, HandlerKind::Graph);
        assert_eq!(resolved.provider.as_deref(), Some("openai"));
        assert_eq!(resolved.model.as_deref(), Some("gpt-4o"));
        assert_eq!(resolved.start_delay_ms, Some(500));
        assert!(!resolved.process_backlog);
    }

    #[test]
    fn environment_gating() {
        let mut group = DeploymentGroup {
            id: "g".into(),
            name: "g".into(),
            description: String::new(),
            environment: "any".into(),
            tags: vec![],
            defaults: MemberSettings::default(),
            agents: vec![],
        };
        assert!(group.available_in("local"));
        group.environment = "production".into();
        assert!(!group.available_in("local"));
        assert!(group.available_in("production"));
    }
}
