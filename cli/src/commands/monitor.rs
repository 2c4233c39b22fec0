// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Run one agent runtime in the foreground. This is the subprocess the
//! supervisor launches; the `monitor ready` log line is its startup signal,
//! and exit code 130 tells the supervisor the stop was signal-cancelled
//! rather than a crash.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use aviary_core::application::runtime::{AgentRuntime, RuntimeOptions};
use aviary_core::domain::control::KillSwitch as _;
use aviary_core::domain::registry::{validate_launch, HandlerKind};
use aviary_core::infrastructure::agent_config::AgentConfig;
use aviary_core::infrastructure::bus::HttpBusClient;
use aviary_core::infrastructure::config::StudioConfig;
use aviary_core::infrastructure::db::Database;
use aviary_core::infrastructure::handlers::{build_handler, HandlerSettings};
use aviary_core::infrastructure::kill_switch::FileKillSwitch;
use aviary_core::infrastructure::message_store::SqliteMessageStore;

pub struct MonitorArgs {
    pub config: Option<PathBuf>,
    pub agent: String,
    pub handler: String,
    pub agent_config: Option<PathBuf>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub no_backlog: bool,
    pub heartbeat_interval: Option<u64>,
}

pub async fn run(args: MonitorArgs) -> Result<()> {
    let config = StudioConfig::load_or_default(args.config).context("failed to load configuration")?;
    config.validate().context("configuration validation failed")?;

    let handler_kind: HandlerKind = args
        .handler
        .parse()
        .context("unknown handler kind")?;
    validate_launch(
        handler_kind,
        args.provider.as_deref(),
        args.model.as_deref(),
    )
    .context("launch parameters rejected by the framework registry")?;

    let agent_config = match &args.agent_config {
        Some(path) => AgentConfig::load_path(path),
        None => AgentConfig::load(&config.configs_dir, &args.agent),
    };
    let identity = match agent_config {
        Ok(agent_config) => agent_config.identity(&args.agent, &config.bus.server_url),
        Err(e) => {
            tracing::warn!(error = %e, "no agent config, using the default bus endpoint");
            AgentConfig {
                mcp_servers: Default::default(),
                permissions: serde_json::Value::Null,
                environment: None,
            }
            .identity(&args.agent, &config.bus.server_url)
        }
    };

    println!(
        "{}",
        format!("Monitor starting for @{} ({handler_kind})", args.agent).green()
    );
    println!("   Bus: {} [{}]", identity.bus.url, identity.environment);
    if !identity.tool_servers.is_empty() {
        println!("   Tool servers: {}", identity.tool_servers.join(", "));
    }
    println!("   Store: {}", config.message_store_path().display());

    let db = Database::open(&config.message_store_path())
        .await
        .context("failed to open the message store")?;
    let store = Arc::new(SqliteMessageStore::new(db).await.context("store migration failed")?);

    let bus = Arc::new(
        HttpBusClient::new(args.agent.clone(), identity.bus.url.clone())
            .with_max_attempts(config.bus.max_attempts),
    );

    let system_prompt = std::env::var("AVIARY_SYSTEM_PROMPT").ok();
    let handler = build_handler(
        handler_kind,
        &HandlerSettings {
            agent: args.agent.clone(),
            provider: args.provider.clone(),
            model: args.model.clone(),
            system_prompt,
        },
    )
    .context("failed to build the handler")?;

    let kill_switch = Arc::new(FileKillSwitch::new(&config.data_dir));
    if kill_switch.is_active() {
        println!("{}", "Kill switch is active; starting paused".yellow());
    }

    let mut options = RuntimeOptions {
        batch_size: config.queue.batch_size,
        history_limit: config.queue.history_limit,
        poll_interval: Duration::from_millis(config.queue.poll_interval_ms),
        heartbeat_interval: config.heartbeat_interval(),
        done_pause: Duration::from_secs(config.queue.done_pause_secs),
        startup_sweep: config.queue.startup_sweep && !args.no_backlog,
        startup_sweep_limit: config.queue.startup_sweep_limit,
        stale_claim: Duration::from_secs(config.queue.stale_claim_secs),
        retention: config.retention(),
        ..RuntimeOptions::default()
    };
    if let Some(secs) = args.heartbeat_interval {
        options.heartbeat_interval = Duration::from_secs(secs);
    }

    let runtime = AgentRuntime::new(
        args.agent.clone(),
        store,
        bus,
        handler,
        kill_switch,
        options,
    );

    let cancel = runtime.cancellation_token();
    let signalled = Arc::new(AtomicBool::new(false));
    spawn_signal_listener(cancel.clone(), Arc::clone(&signalled));

    runtime.run().await?;

    if signalled.load(Ordering::Relaxed) {
        info!(agent = %args.agent, "monitor cancelled by signal");
        // 130: cancelled by signal, recorded as a stop, not a crash.
        std::process::exit(130);
    }
    Ok(())
}

fn spawn_signal_listener(
    cancel: tokio_util::sync::CancellationToken,
    signalled: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable");
                    let _ = tokio::signal::ctrl_c().await;
                    signalled.store(true, Ordering::Relaxed);
                    cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        signalled.store(true, Ordering::Relaxed);
        cancel.cancel();
    });
}
