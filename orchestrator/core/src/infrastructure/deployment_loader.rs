// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Deployment Group Loader
//!
//! Reads `configs/deployments.yaml`:
//!
//! ```yaml
//! groups:
//!   - id: scrum
//!     name: Scrum team
//!     defaults:
//!       monitor: graph
//!       provider: openai
//!       model: gpt-4o-mini
//!     agents:
//!       - id: po_agent
//!       - id: dev_agent
//!         model: gpt-4o
//! ```
//!
//! Missing file means no groups, not an error; `reload` re-reads on demand.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::Deserialize;

use crate::domain::deployment::{DeploymentCatalog, DeploymentGroup};

#[derive(Debug, Default, Deserialize)]
struct DeploymentsFile {
    #[serde(default)]
    groups: Vec<DeploymentGroup>,
}

pub struct YamlDeploymentCatalog {
    path: PathBuf,
    groups: RwLock<Vec<DeploymentGroup>>,
}

impl YamlDeploymentCatalog {
    pub fn new(configs_dir: &Path) -> Self {
        let catalog = Self {
            path: configs_dir.join("deployments.yaml"),
            groups: RwLock::new(Vec::new()),
        };
        if let Err(e) = catalog.reload() {
            tracing::warn!(error = %e, "deployment groups not loaded");
        }
        catalog
    }

    fn read_file(&self) -> anyhow::Result<Vec<DeploymentGroup>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let parsed: DeploymentsFile = serde_yaml::from_str(&raw)?;
        Ok(parsed.groups)
    }
}

impl DeploymentCatalog for YamlDeploymentCatalog {
    fn get(&self, id: &str) -> Option<DeploymentGroup> {
        self.groups
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|group| group.id == id)
            .cloned()
    }

    fn list(&self, environment: Option<&str>) -> Vec<DeploymentGroup> {
        self.groups
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|group| environment.map_or(true, |env| group.available_in(env)))
            .cloned()
            .collect()
    }

    fn reload(&self) -> anyhow::Result<()> {
        let groups = self.read_file()?;
        tracing::info!(count = groups.len(), "deployment groups loaded");
        *self
            .groups
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = groups;
        Ok(())
    }
}
