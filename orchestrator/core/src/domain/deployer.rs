// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Deployment Capability
//!
//! Helper pods (sshd / rsync agents) are stood up as named releases of a
//! packaged chart. Strategies only build the values tree; how the release
//! is installed is up to the implementation.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::endpoint::VolumeEndpoint;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Failed to install release '{release}': {reason}")]
    InstallFailed { release: String, reason: String },
    #[error("Failed to uninstall release '{release}': {reason}")]
    UninstallFailed { release: String, reason: String },
    #[error("Helper binary unavailable: {0}")]
    BinaryNotFound(String),
    #[error("Failed to render values: {0}")]
    Values(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Deployer: Send + Sync {
    /// Installs `release` into the cluster of `target`. Blocks until the release is ready.
    async fn install(
        &self,
        release: &str,
        target: &VolumeEndpoint,
        values: serde_json::Value,
    ) -> Result<(), DeployError>;

    /// Removes `release`. Removing a release that does not exist succeeds.
    async fn uninstall(&self, release: &str, target: &VolumeEndpoint) -> Result<(), DeployError>;
}
