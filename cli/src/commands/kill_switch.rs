// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Toggle the fleet-wide kill switch from the shell. Works while the
//! supervisor is down: the flag is a file, and running monitors observe it
//! within two seconds on their own.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use aviary_core::domain::control::KillSwitch as _;
use aviary_core::infrastructure::config::StudioConfig;
use aviary_core::infrastructure::kill_switch::FileKillSwitch;

#[derive(Subcommand)]
pub enum KillSwitchCommand {
    /// Pause every monitor (they stay alive and idle)
    Activate,
    /// Resume the fleet
    Deactivate,
    /// Show whether the switch is active
    Status,
}

pub fn run(config_path: Option<PathBuf>, command: KillSwitchCommand) -> Result<()> {
    let config =
        StudioConfig::load_or_default(config_path).context("failed to load configuration")?;
    let switch = FileKillSwitch::new(&config.data_dir);

    match command {
        KillSwitchCommand::Activate => {
            switch.activate()?;
            println!(
                "{}",
                "Kill switch ACTIVATED - all monitors pause within 2s".red().bold()
            );
        }
        KillSwitchCommand::Deactivate => {
            switch.deactivate()?;
            println!("{}", "Kill switch deactivated - monitors resuming".green());
        }
        KillSwitchCommand::Status => {
            if switch.is_active() {
                println!("{}", "Kill switch: ACTIVE".red().bold());
                println!("  Flag file: {}", switch.path().display());
            } else {
                println!("{}", "Kill switch: inactive".green());
            }
        }
    }
    Ok(())
}
