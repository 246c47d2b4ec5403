// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the pv-migrate CLI

pub mod completions;
pub mod config;
pub mod migrate;
pub mod strategies;

pub use self::config::ConfigCommand;
pub use self::migrate::MigrateArgs;
