// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod backlog;
pub mod runtime;
pub mod supervisor;
