// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! pv-migrate core
//!
//! Moves the contents of one Kubernetes persistent volume claim into another.
//!
//! # Architecture
//!
//! - **domain:** requests, endpoints, configuration and the capability traits
//!   (`ClusterClient`, `Deployer`) everything else is written against
//! - **application:** the strategy engine, the three transfer strategies,
//!   per-attempt cleanup and claim resolution
//! - **infrastructure:** kube and helm backed implementations, port-forwards,
//!   ssh keys and rsync plumbing

pub mod domain;
pub mod application;
pub mod infrastructure;
