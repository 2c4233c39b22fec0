// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Run the fleet supervisor with its HTTP/WebSocket control plane.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use aviary_core::application::supervisor::{Supervisor, SupervisorSettings};
use aviary_core::infrastructure::bus::HttpBusClientFactory;
use aviary_core::infrastructure::config::StudioConfig;
use aviary_core::infrastructure::db::Database;
use aviary_core::infrastructure::deployment_loader::YamlDeploymentCatalog;
use aviary_core::infrastructure::kill_switch::FileKillSwitch;
use aviary_core::infrastructure::log_stream::LogMultiplexer;
use aviary_core::infrastructure::message_store::SqliteMessageStore;
use aviary_core::infrastructure::process::LocalProcessLauncher;
use aviary_core::presentation::api::{self, AppState};
use std::time::Duration;

pub async fn run(config_path: Option<PathBuf>, host: String, port: u16) -> Result<()> {
    let config =
        StudioConfig::load_or_default(config_path.clone()).context("failed to load configuration")?;
    config.validate().context("configuration validation failed")?;

    std::fs::create_dir_all(&config.data_dir).context("failed to create the data directory")?;
    std::fs::create_dir_all(&config.log_dir).context("failed to create the log directory")?;

    println!("{}", "Aviary supervisor starting".green().bold());
    println!("   Configs: {}", config.configs_dir.display());
    println!("   Store:   {}", config.message_store_path().display());
    println!("   Bus:     {}", config.bus.server_url);

    let db = Database::open(&config.message_store_path())
        .await
        .context("failed to open the message store")?;
    let store = Arc::new(SqliteMessageStore::new(db).await.context("store migration failed")?);

    let logs = LogMultiplexer::with_default_capacity();
    let kill_switch = Arc::new(FileKillSwitch::new(&config.data_dir));
    let catalog = Arc::new(YamlDeploymentCatalog::new(&config.configs_dir));
    let bus_factory = Arc::new(HttpBusClientFactory::new(
        config.configs_dir.clone(),
        config.bus.server_url.clone(),
    ));

    let binary = std::env::current_exe().context("failed to locate the aviary binary")?;
    let launcher = Arc::new(
        LocalProcessLauncher::new(binary, config.log_dir.clone(), logs.clone())
            .with_studio_config(config_path),
    );

    let supervisor = Arc::new(Supervisor::new(
        SupervisorSettings {
            configs_dir: config.configs_dir.clone(),
            log_dir: config.log_dir.clone(),
            default_server_url: config.bus.server_url.clone(),
            startup_grace: Duration::from_secs(config.supervisor.startup_grace_secs),
            stop_grace: Duration::from_secs(config.supervisor.stop_grace_secs),
            handler_timeout: Duration::from_secs(config.supervisor.handler_timeout_secs),
            max_drain_iterations: config.supervisor.max_drain_iterations,
        },
        launcher,
        Arc::clone(&store) as _,
        Arc::clone(&kill_switch) as _,
        Arc::clone(&catalog) as _,
        bus_factory,
    ));

    let shutdown = CancellationToken::new();
    let watchdog = supervisor.spawn_watchdog(shutdown.clone());

    let state = Arc::new(AppState {
        supervisor: Arc::clone(&supervisor),
        store,
        catalog,
        logs,
        started_at: std::time::Instant::now(),
    });
    let router = api::app(state);

    let address = format!("{host}:{port}");
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    println!(
        "{}",
        format!("Control plane listening on http://{address}").green()
    );

    let server_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = server_shutdown.cancelled() => {}
            }
        })
        .await
        .context("control plane server failed")?;

    info!("control plane shut down, stopping watchdog");
    shutdown.cancel();
    let _ = watchdog.await;

    println!("{}", "Supervisor stopped".yellow());
    Ok(())
}
