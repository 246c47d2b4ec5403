// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cleanup Registry
//!
//! Every external resource an attempt provisions is tracked here before (or
//! right after) it is created. Releasing drains the list, so the first
//! release does the work and later ones are no-ops.
//!
//! A strategy arms the registry around its provisioning section. The armed
//! [`CleanupGuard`] releases everything on normal completion (via
//! [`CleanupGuard::finish`]), when it is dropped without finishing (the run
//! future was abandoned) or when the attempt's cancellation token fires.

use std::fmt;
use std::sync::Arc;
use tempfile::TempPath;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::cluster::ClusterClient;
use crate::domain::deployer::Deployer;
use crate::domain::endpoint::VolumeEndpoint;
use crate::infrastructure::tunnel::PortForward;

#[derive(Debug, Error)]
#[error("Failed to release {}", .failures.join("; "))]
pub struct CleanupError {
    pub failures: Vec<String>,
}

/// An external resource owned by one attempt.
pub enum TrackedResource {
    Release {
        name: String,
        target: Arc<VolumeEndpoint>,
        deployer: Arc<dyn Deployer>,
    },
    Job {
        cluster: Arc<dyn ClusterClient>,
        namespace: String,
        name: String,
    },
    Tunnel(PortForward),
    KeyFile(TempPath),
}

impl fmt::Display for TrackedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackedResource::Release { name, target, .. } => {
                write!(f, "release {}/{}", target.namespace(), name)
            }
            TrackedResource::Job {
                namespace, name, ..
            } => write!(f, "job {}/{}", namespace, name),
            TrackedResource::Tunnel(forward) => {
                write!(f, "port-forward {} -> {}", forward.local_port(), forward.target())
            }
            TrackedResource::KeyFile(path) => write!(f, "key file {}", path.display()),
        }
    }
}

impl TrackedResource {
    async fn release(self) -> Result<(), String> {
        let label = self.to_string();
        let result = match self {
            TrackedResource::Release {
                name,
                target,
                deployer,
            } => deployer
                .uninstall(&name, &target)
                .await
                .map_err(|e| e.to_string()),
            TrackedResource::Job {
                cluster,
                namespace,
                name,
            } => cluster
                .delete_job(&namespace, &name)
                .await
                .map_err(|e| e.to_string()),
            TrackedResource::Tunnel(forward) => {
                forward.stop().await;
                Ok(())
            }
            TrackedResource::KeyFile(path) => wipe_key_file(path).map_err(|e| e.to_string()),
        };
        result.map_err(|e| format!("{}: {}", label, e))
    }
}

fn wipe_key_file(path: TempPath) -> std::io::Result<()> {
    if let Ok(meta) = std::fs::metadata(&path) {
        std::fs::write(&path, vec![0u8; meta.len() as usize])?;
    }
    path.close()
}

pub struct CleanupRegistry {
    attempt_id: String,
    resources: Mutex<Vec<TrackedResource>>,
}

impl CleanupRegistry {
    pub fn new(attempt_id: impl Into<String>) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            resources: Mutex::new(Vec::new()),
        }
    }

    pub async fn track(&self, resource: TrackedResource) {
        debug!(attempt = %self.attempt_id, "Tracking {}", resource);
        self.resources.lock().await.push(resource);
    }

    pub async fn tracked(&self) -> usize {
        self.resources.lock().await.len()
    }

    /// Releases every tracked resource, newest first.
    ///
    /// Failures are logged and returned together; they never stop the
    /// remaining resources from being released. Concurrent callers wait for
    /// the one doing the work and then find nothing left to release.
    pub async fn release(&self) -> Result<(), CleanupError> {
        let mut resources = self.resources.lock().await;
        if resources.is_empty() {
            return Ok(());
        }

        info!(attempt = %self.attempt_id, "Cleaning up {} resource(s)", resources.len());
        let mut failures = Vec::new();
        while let Some(resource) = resources.pop() {
            if let Err(e) = resource.release().await {
                warn!(attempt = %self.attempt_id, "Cleanup failed: {}", e);
                failures.push(e);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CleanupError { failures })
        }
    }

    /// Starts watching for completion, abandonment or cancellation.
    pub fn arm(self: &Arc<Self>, cancel: CancellationToken) -> CleanupGuard {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let registry = Arc::clone(self);

        let watcher = tokio::spawn(async move {
            tokio::select! {
                done = done_rx => {
                    if done.is_err() {
                        debug!(attempt = %registry.attempt_id, "Attempt abandoned, releasing resources");
                        let _ = registry.release().await;
                    }
                }
                _ = cancel.cancelled() => {
                    warn!(attempt = %registry.attempt_id, "Interrupted, releasing resources");
                    let _ = registry.release().await;
                }
            }
        });

        CleanupGuard {
            registry: Arc::clone(self),
            done: Some(done_tx),
            watcher: Some(watcher),
        }
    }
}

/// Scope of an armed registry. Consume with [`CleanupGuard::finish`].
pub struct CleanupGuard {
    registry: Arc<CleanupRegistry>,
    done: Option<oneshot::Sender<()>>,
    watcher: Option<JoinHandle<()>>,
}

impl CleanupGuard {
    /// Signals normal completion and releases everything tracked.
    pub async fn finish(mut self) -> Result<(), CleanupError> {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
        if let Some(watcher) = self.watcher.take() {
            if let Err(e) = watcher.await {
                warn!("Cleanup watcher ended abnormally: {}", e);
            }
        }
        self.registry.release().await
    }
}
