// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Publish a test mention between agents, e.g.
//! `aviary send --from bob --to alpha hello there`.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use aviary_core::domain::bus::BusClientFactory as _;
use aviary_core::infrastructure::bus::HttpBusClientFactory;
use aviary_core::infrastructure::config::StudioConfig;

pub async fn run(
    config_path: Option<PathBuf>,
    from: String,
    to: String,
    message: String,
) -> Result<()> {
    if message.trim().is_empty() {
        anyhow::bail!("message must not be empty");
    }

    let config =
        StudioConfig::load_or_default(config_path).context("failed to load configuration")?;
    let factory = HttpBusClientFactory::new(
        config.configs_dir.clone(),
        config.bus.server_url.clone(),
    );

    let client = factory
        .client_for(&from)
        .map_err(|e| anyhow::anyhow!("bus client for @{from}: {e}"))?;
    let content = format!("@{to} {message}");
    let message_id = client
        .send(&content, None)
        .await
        .map_err(|e| anyhow::anyhow!("send failed: {e}"))?;

    println!(
        "{}",
        format!(
            "Sent as @{from}: {content} (id: {})",
            message_id.as_deref().unwrap_or("unknown")
        )
        .green()
    );
    Ok(())
}
