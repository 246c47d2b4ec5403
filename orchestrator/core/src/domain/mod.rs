// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Migration requests, resolved endpoints and the capabilities strategies
//! are allowed to use (cluster access and helper deployment).
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types and capability traits, no I/O

pub mod cluster;
pub mod config;
pub mod deployer;
pub mod endpoint;
pub mod request;
pub mod task;
