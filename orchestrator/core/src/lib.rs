// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Aviary Core
//!
//! The agent-fleet kernel. Connects named agents to a shared MCP message bus
//! and drives each one through a poll → process → reply loop backed by a
//! durable per-agent FIFO queue.
//!
//! # Architecture
//!
//! - **domain** — entities, value objects and the trait seams
//!   ([`domain::store::MessageStore`], [`domain::bus::BusClient`],
//!   [`domain::handler::MessageHandler`], [`domain::launcher::MonitorLauncher`])
//! - **application** — the per-agent runtime kernel and the fleet supervisor
//! - **infrastructure** — SQLite store, HTTP bus client, LLM adapters,
//!   subprocess launcher, kill switch, log multiplexer
//! - **presentation** — axum control plane (REST + WebSocket log stream)

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
