// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod frameworks;
pub mod kill_switch;
pub mod monitor;
pub mod reset;
pub mod send;
pub mod serve;

pub use kill_switch::KillSwitchCommand;
