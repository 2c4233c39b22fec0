// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Clear one agent's backlog from the shell: local Pending rows plus a
//! paced drain of its unread bus messages. Make sure the agent's monitor is
//! stopped first; the supervisor-side reset enforces that, this one can
//! only warn.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use aviary_core::application::backlog::BacklogService;
use aviary_core::infrastructure::bus::HttpBusClientFactory;
use aviary_core::infrastructure::config::StudioConfig;
use aviary_core::infrastructure::db::Database;
use aviary_core::infrastructure::message_store::SqliteMessageStore;

pub async fn run(config_path: Option<PathBuf>, agent: String) -> Result<()> {
    let config =
        StudioConfig::load_or_default(config_path).context("failed to load configuration")?;

    println!("Resetting backlog for @{agent}…");
    println!(
        "{}",
        "   (stop the agent's monitor first, or it will race this reset)".yellow()
    );

    let db = Database::open(&config.message_store_path())
        .await
        .context("failed to open the message store")?;
    let store = Arc::new(SqliteMessageStore::new(db).await.context("store migration failed")?);
    let bus_factory = Arc::new(HttpBusClientFactory::new(
        config.configs_dir.clone(),
        config.bus.server_url.clone(),
    ));

    let service = BacklogService::new(store, bus_factory, config.supervisor.max_drain_iterations);
    let summary = service.reset_agent(&agent).await;

    println!(
        "{}",
        format!(
            "Cleared {} local / {} remote messages",
            summary.local_cleared, summary.remote_cleared
        )
        .green()
    );
    for error in &summary.errors {
        println!("{}", format!("   warning: {error}").yellow());
    }
    Ok(())
}
