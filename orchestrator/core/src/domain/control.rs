// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Kill Switch
//!
//! Process-global pause flag. When active, every runtime stops polling and
//! processing within two seconds but stays alive; deactivation resumes them
//! with nothing lost. Backed by an on-disk flag file so it survives
//! supervisor restarts and can be toggled by out-of-band tooling.

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("kill switch I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Read side is used by runtimes (observed with bounded staleness, ≤ 2 s);
/// write side belongs to the supervisor and operator tooling.
pub trait KillSwitch: Send + Sync {
    fn is_active(&self) -> bool;

    fn activate(&self) -> Result<(), ControlError>;

    fn deactivate(&self) -> Result<(), ControlError>;
}
