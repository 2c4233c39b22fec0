// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Aviary CLI
//!
//! The `aviary` binary wears two hats:
//!
//! - **Supervisor mode**: `aviary serve` runs the fleet supervisor with its
//!   HTTP/WebSocket control plane.
//! - **Monitor mode**: `aviary monitor <agent> …` runs one agent runtime in
//!   the foreground. This is the subprocess the supervisor spawns, and it is
//!   equally usable by hand for a single agent.
//!
//! Operator tooling (`kill-switch`, `reset`, `send`, `frameworks`) rounds it
//! out so a fleet can be driven without the dashboard.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::KillSwitchCommand;

/// Aviary — drive a fleet of MCP agents through a durable mention queue.
#[derive(Parser)]
#[command(name = "aviary")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "AVIARY_CONFIG",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Control-plane port
    #[arg(long, global = true, env = "AVIARY_PORT", default_value = "8100")]
    port: u16,

    /// Control-plane host
    #[arg(long, global = true, env = "AVIARY_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AVIARY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor and its control plane
    Serve,

    /// Run one agent monitor in the foreground
    Monitor {
        /// Agent name on the bus
        agent: String,

        /// Handler kind (echo, ollama, anthropic, openai, graph)
        #[arg(long)]
        handler: String,

        /// Agent config JSON (defaults to configs/agents/<agent>.json)
        #[arg(long, value_name = "FILE")]
        agent_config: Option<PathBuf>,

        /// Model, for handlers that require one
        #[arg(long)]
        model: Option<String>,

        /// Provider, for graph handlers
        #[arg(long)]
        provider: Option<String>,

        /// Skip the startup backlog sweep
        #[arg(long)]
        no_backlog: bool,

        /// Override the heartbeat interval in seconds (0 disables)
        #[arg(long)]
        heartbeat_interval: Option<u64>,
    },

    /// Inspect or toggle the fleet-wide kill switch
    KillSwitch {
        #[command(subcommand)]
        command: KillSwitchCommand,
    },

    /// Clear an agent's backlog (local queue + unread bus messages)
    Reset {
        /// Agent name
        agent: String,
    },

    /// Publish a test mention from one agent to another
    Send {
        /// Sending agent
        #[arg(long)]
        from: String,

        /// Receiving agent (will be @mentioned)
        #[arg(long)]
        to: String,

        /// Message text
        message: Vec<String>,
    },

    /// Print the framework registry
    Frameworks,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve => commands::serve::run(cli.config, cli.host, cli.port).await,
        Commands::Monitor {
            agent,
            handler,
            agent_config,
            model,
            provider,
            no_backlog,
            heartbeat_interval,
        } => {
            commands::monitor::run(commands::monitor::MonitorArgs {
                config: cli.config,
                agent,
                handler,
                agent_config,
                model,
                provider,
                no_backlog,
                heartbeat_interval,
            })
            .await
        }
        Commands::KillSwitch { command } => commands::kill_switch::run(cli.config, command),
        Commands::Reset { agent } => commands::reset::run(cli.config, agent).await,
        Commands::Send { from, to, message } => {
            commands::send::run(cli.config, from, to, message.join(" ")).await
        }
        Commands::Frameworks => {
            commands::frameworks::run();
            Ok(())
        }
    }
}
