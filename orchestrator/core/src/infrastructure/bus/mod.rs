// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod http;
pub mod protocol;

pub use http::{HttpBusClient, HttpBusClientFactory, Pacer};
