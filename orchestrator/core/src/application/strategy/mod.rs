// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Transfer Strategies
//!
//! A strategy is one topology for moving the data. The engine only knows the
//! contract below; everything topology specific (which helpers to stand up,
//! where rsync runs, how the two sides reach each other) lives in the
//! implementations.
//!
//! | name    | priority | topology                                          |
//! |---------|----------|---------------------------------------------------|
//! | `mnt2`  | 1000     | one job mounting both claims                      |
//! | `svc`   | 2000     | rsync pod pulls from an sshd pod over the cluster |
//! | `local` | 3000     | both sshd pods relayed through this machine       |

pub mod local;
pub mod mount_both;
pub mod svc;

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::attempt::Attempt;
use crate::application::cleanup::{CleanupError, CleanupGuard};
use crate::domain::cluster::{ClusterClient, ClusterError, JobOutcome};
use crate::domain::config::MigrationConfig;
use crate::domain::deployer::{DeployError, Deployer};
use crate::domain::request::MigrationOptions;
use crate::domain::task::Task;
use crate::infrastructure::keys::KeyError;
use crate::infrastructure::transfer::{
    BarRenderer, LogRenderer, ProgressRenderer, ProgressTail, TransferError,
};
use crate::infrastructure::tunnel::TunnelError;

pub use local::LocalRelay;
pub use mount_both::MountBoth;
pub use svc::ServiceStrategy;

/// Names in default order
pub const DEFAULT_STRATEGIES: [&str; 3] = [mount_both::NAME, svc::NAME, local::NAME];

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error(transparent)]
    Deploy(#[from] DeployError),
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error("Job {0} failed")]
    JobFailed(String),
    #[error(transparent)]
    Cleanup(#[from] CleanupError),
    #[error("Attempt cancelled")]
    Cancelled,
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Lower runs first when no explicit order was requested.
    fn priority(&self) -> u32;

    fn can_do(&self, task: &Task) -> bool;

    /// Provisions, transfers and releases. Must release what it provisioned
    /// on every path, including early returns.
    async fn run(&self, attempt: &Attempt) -> Result<(), StrategyError>;

    /// Releases whatever the attempt still tracks. Safe to call after `run`
    /// already cleaned up.
    async fn cleanup(&self, attempt: &Attempt) -> Result<(), StrategyError> {
        attempt.cleanup().release().await?;
        Ok(())
    }
}

/// Everything a strategy needs besides the attempt.
#[derive(Clone)]
pub struct StrategyContext {
    pub config: Arc<MigrationConfig>,
    pub deployer: Arc<dyn Deployer>,
}

impl StrategyContext {
    pub fn new(config: Arc<MigrationConfig>, deployer: Arc<dyn Deployer>) -> Self {
        Self { config, deployer }
    }

    /// Renderer for the transfer progress, if any should be shown.
    pub fn progress_renderer(&self, options: &MigrationOptions) -> Option<Box<dyn ProgressRenderer>> {
        if options.no_progress_bar {
            return None;
        }
        match self.config.logging.format.as_str() {
            "json" => Some(Box::new(LogRenderer::new())),
            _ => Some(Box::new(BarRenderer::new())),
        }
    }

    pub fn pod_ready_timeout(&self) -> Duration {
        self.config.tunnel.pod_ready_timeout()
    }
}

/// The built-in strategies in default order.
pub fn default_strategies(context: StrategyContext) -> Vec<Arc<dyn Strategy>> {
    vec![
        Arc::new(MountBoth::new(context.clone())),
        Arc::new(ServiceStrategy::new(context.clone())),
        Arc::new(LocalRelay::new(context)),
    ]
}

/// Finishes the guard; a failed release is only a warning.
pub(crate) async fn finish_cleanup(guard: CleanupGuard, attempt: &Attempt) {
    if let Err(e) = guard.finish().await {
        warn!(attempt = %attempt.id(), strategy = %attempt.strategy(), "Some resources could not be released: {}", e);
    }
}

/// Waits for the pod of a job, tails its output and waits for the job to finish.
pub(crate) async fn follow_job(
    cluster: &Arc<dyn ClusterClient>,
    namespace: &str,
    job_name: &str,
    renderer: Option<Box<dyn ProgressRenderer>>,
    pod_timeout: Duration,
) -> Result<(), StrategyError> {
    let selector = format!("job-name={}", job_name);
    let pod = cluster
        .wait_for_job_pod(namespace, &selector, pod_timeout)
        .await?;
    info!("Transfer running in pod {}/{}", pod.namespace, pod.name);

    let logs = cluster.follow_logs(&pod).await?;
    let tail = ProgressTail::spawn(vec![logs], renderer);

    let outcome = cluster.wait_for_job(namespace, job_name).await;
    let succeeded = matches!(outcome, Ok(JobOutcome::Succeeded));
    tail.finish(succeeded).await;

    match outcome? {
        JobOutcome::Succeeded => Ok(()),
        JobOutcome::Failed => Err(StrategyError::JobFailed(format!("{}/{}", namespace, job_name))),
    }
}

/// Helm `image` values for a `repository[:tag]` reference.
pub(crate) fn image_values(image: &str) -> serde_json::Value {
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(colon) => {
            let split = name_start + colon;
            json!({ "repository": &image[..split], "tag": &image[split + 1..] })
        }
        None => json!({ "repository": image }),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_values() {
        assert_eq!(
            image_values("docker.io/utkuozdemir/pv-migrate-rsync:alpine-3-20210522"),
            json!({"repository": "docker.io/utkuozdemir/pv-migrate-rsync", "tag": "alpine-3-20210522"})
        );
        assert_eq!(
            image_values("localhost:5000/rsync"),
            json!({"repository": "localhost:5000/rsync"})
        );
    }

    #[test]
    fn test_progress_renderer_selection() {
        let mut config = MigrationConfig::default();
        config.logging.format = "json".to_string();
        let context = StrategyContext::new(
            Arc::new(config),
            Arc::new(testing::RecordingDeployer::default()),
        );
        assert!(context.progress_renderer(&testing::quiet_options()).is_none());
        assert!(context.progress_renderer(&MigrationOptions::default()).is_some());
    }
}
