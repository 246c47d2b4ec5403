// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod cluster;
pub mod helm;
pub mod keys;
pub mod ssh;
pub mod transfer;
pub mod tunnel;

pub use cluster::{InMemoryCluster, InMemoryConnector, KubeCluster, KubeConnector, PodPhase};
pub use helm::HelmDeployer;
pub use keys::{create_key_pair, KeyError, KeyPair};
pub use tunnel::{port_forward, PortForward, TunnelError};
