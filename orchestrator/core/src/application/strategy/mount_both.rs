// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Co-located Job (`mnt2`)
//!
//! Both claims are mounted into a single batch job that runs rsync locally.
//! Needs both claims in one namespace of one cluster, and a node where both
//! can be attached at the same time.

use async_trait::async_trait;
use tracing::info;

use super::{finish_cleanup, follow_job, Strategy, StrategyContext, StrategyError};
use crate::application::attempt::Attempt;
use crate::application::cleanup::TrackedResource;
use crate::domain::cluster::{ClaimMount, TransferJob};
use crate::domain::task::Task;
use crate::infrastructure::transfer::{
    mount_path, retry_script, RsyncCommand, RsyncLocation, DEST_MOUNT, SOURCE_MOUNT,
};

pub const NAME: &str = "mnt2";
const PRIORITY: u32 = 1000;

pub struct MountBoth {
    context: StrategyContext,
}

impl MountBoth {
    pub fn new(context: StrategyContext) -> Self {
        Self { context }
    }

    fn build_job(
        &self,
        attempt: &Attempt,
        node: Option<String>,
    ) -> Result<TransferJob, StrategyError> {
        let task = attempt.task();
        let options = task.options();
        let config = &self.context.config;

        let command = RsyncCommand::new(
            RsyncLocation::local(mount_path(SOURCE_MOUNT, task.source().path())),
            RsyncLocation::local(mount_path(DEST_MOUNT, task.dest().path())),
        )
        .with_delete(options.delete_extraneous_files)
        .with_no_chown(options.no_chown)
        .build()?;

        Ok(TransferJob {
            name: attempt.resource_name("rsync"),
            namespace: task.dest().namespace().to_string(),
            image: config.images.rsync.clone(),
            script: retry_script(
                &command,
                config.job.rsync_retries,
                config.job.rsync_retry_delay_seconds,
            ),
            mounts: vec![
                ClaimMount {
                    claim: task.source().claim_name().to_string(),
                    mount_path: SOURCE_MOUNT.to_string(),
                    read_only: options.source_mount_read_only,
                },
                ClaimMount {
                    claim: task.dest().claim_name().to_string(),
                    mount_path: DEST_MOUNT.to_string(),
                    read_only: false,
                },
            ],
            node_name: node,
            labels: attempt.labels("rsync"),
            ttl_seconds_after_finished: config.job.ttl_seconds_after_finished,
            backoff_limit: 0,
            service_account: config.job.service_account.clone(),
        })
    }
}

/// Node the job must run on, or None to let the scheduler pick.
///
/// A shareable source with a multi-writer destination can go anywhere. An
/// exclusive source pins the job to the node using it; otherwise the
/// destination's node wins.
pub fn determine_target_node(task: &Task) -> Option<String> {
    let source = task.source();
    let dest = task.dest();
    if (source.supports_rox() || source.supports_rwx()) && dest.supports_rwx() {
        return None;
    }
    if source.is_exclusive() {
        return source.mounted_node().map(str::to_string);
    }
    dest.mounted_node().map(str::to_string)
}

#[async_trait]
impl Strategy for MountBoth {
    fn name(&self) -> &str {
        NAME
    }

    fn priority(&self) -> u32 {
        PRIORITY
    }

    fn can_do(&self, task: &Task) -> bool {
        if !task.same_cluster() || !task.same_namespace() {
            return false;
        }
        let source = task.source();
        let dest = task.dest();
        let same_node = source.mounted_node() == dest.mounted_node();
        same_node || source.supports_rox() || source.supports_rwx() || dest.supports_rwx()
    }

    async fn run(&self, attempt: &Attempt) -> Result<(), StrategyError> {
        let task = attempt.task();
        let node = determine_target_node(task);
        let job = self.build_job(attempt, node)?;
        let cluster = task.dest().cluster().clone();

        info!(
            attempt = %attempt.id(),
            "Running job {} on {}",
            job.name,
            job.node_name.as_deref().unwrap_or("any node")
        );

        let guard = attempt.cleanup().arm(attempt.cancel_token().clone());
        attempt
            .cleanup()
            .track(TrackedResource::Job {
                cluster: cluster.clone(),
                namespace: job.namespace.clone(),
                name: job.name.clone(),
            })
            .await;

        let result: Result<(), StrategyError> = async {
            cluster.create_job(&job).await?;
            follow_job(
                &cluster,
                &job.namespace,
                &job.name,
                self.context.progress_renderer(task.options()),
                self.context.pod_ready_timeout(),
            )
            .await
        }
        .await;

        finish_cleanup(guard, attempt).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::domain::cluster::JobOutcome;
    use crate::domain::endpoint::AccessMode::*;
    use crate::domain::request::MigrationOptions;
    use crate::domain::cluster::ClusterClient;
    use crate::infrastructure::cluster::{InMemoryCluster, PodPhase};
    use std::sync::Arc;
    use std::time::Duration;

    fn strategy() -> MountBoth {
        MountBoth::new(context(Arc::new(RecordingDeployer::default())))
    }

    #[test]
    fn test_target_node_unconstrained_for_shared_claims() {
        let cluster = Arc::new(InMemoryCluster::new("https://a"));
        let task = task(
            endpoint(&cluster, "ns", "old", &[ReadOnlyMany], Some("node-1")),
            endpoint(&cluster, "ns", "new", &[ReadWriteMany], Some("node-2")),
            quiet_options(),
        );
        assert_eq!(determine_target_node(&task), None);
    }

    #[test]
    fn test_target_node_follows_exclusive_source() {
        let cluster = Arc::new(InMemoryCluster::new("https://a"));
        let task = task(
            endpoint(&cluster, "ns", "old", &[ReadWriteOnce], Some("node-1")),
            endpoint(&cluster, "ns", "new", &[ReadWriteMany], Some("node-2")),
            quiet_options(),
        );
        assert_eq!(determine_target_node(&task), Some("node-1".to_string()));
    }

    #[test]
    fn test_target_node_falls_back_to_dest() {
        let cluster = Arc::new(InMemoryCluster::new("https://a"));
        let task = task(
            endpoint(&cluster, "ns", "old", &[ReadOnlyMany], Some("node-1")),
            endpoint(&cluster, "ns", "new", &[ReadWriteOnce], Some("node-2")),
            quiet_options(),
        );
        assert_eq!(determine_target_node(&task), Some("node-2".to_string()));
    }

    #[test]
    fn test_can_do() {
        let a = Arc::new(InMemoryCluster::new("https://a"));
        let b = Arc::new(InMemoryCluster::new("https://b"));
        let s = strategy();

        // Exclusive claims on different nodes
        let t = task(
            endpoint(&a, "ns", "old", &[ReadWriteOnce], Some("node-1")),
            endpoint(&a, "ns", "new", &[ReadWriteOnce], Some("node-2")),
            quiet_options(),
        );
        assert!(!s.can_do(&t));

        // Both unmounted count as the same node
        let t = task(
            endpoint(&a, "ns", "old", &[ReadWriteOnce], None),
            endpoint(&a, "ns", "new", &[ReadWriteOnce], None),
            quiet_options(),
        );
        assert!(s.can_do(&t));

        let t = task(
            endpoint(&a, "ns1", "old", &[ReadWriteMany], None),
            endpoint(&a, "ns2", "new", &[ReadWriteMany], None),
            quiet_options(),
        );
        assert!(!s.can_do(&t));

        let t = task(
            endpoint(&a, "ns", "old", &[ReadWriteMany], None),
            endpoint(&b, "ns", "new", &[ReadWriteMany], None),
            quiet_options(),
        );
        assert!(!s.can_do(&t));
    }

    #[tokio::test]
    async fn test_run_creates_pinned_job_and_cleans_up() {
        let cluster = Arc::new(InMemoryCluster::new("https://a"));
        let task = task(
            endpoint(&cluster, "ns", "old", &[ReadWriteOnce], Some("node-1")),
            endpoint(&cluster, "ns", "new", &[ReadWriteOnce], Some("node-1")),
            MigrationOptions {
                delete_extraneous_files: true,
                ..quiet_options()
            },
        );
        let attempt = attempt(task, NAME);

        strategy().run(&attempt).await.unwrap();

        let jobs = cluster.created_jobs();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.name, format!("pv-migrate-{}-rsync", attempt.id()));
        assert_eq!(job.namespace, "ns");
        assert_eq!(job.node_name.as_deref(), Some("node-1"));
        assert_eq!(job.backoff_limit, 0);
        assert_eq!(job.ttl_seconds_after_finished, 600);
        assert!(job.mounts[0].read_only);
        assert!(!job.mounts[1].read_only);
        assert!(job.script.contains("--delete /source/ /dest/"));
        assert_eq!(
            job.labels.get("app.kubernetes.io/instance"),
            Some(&attempt.release_name().to_string())
        );

        assert!(cluster.active_jobs().is_empty());
        strategy().cleanup(&attempt).await.unwrap();
        assert_eq!(cluster.deleted_jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_job_is_an_error_and_still_cleaned_up() {
        let cluster = Arc::new(InMemoryCluster::new("https://a"));
        cluster.set_job_outcome(JobOutcome::Failed);
        let task = task(
            endpoint(&cluster, "ns", "old", &[ReadWriteMany], None),
            endpoint(&cluster, "ns", "new", &[ReadWriteMany], None),
            quiet_options(),
        );
        let attempt = attempt(task, NAME);

        let err = strategy().run(&attempt).await.unwrap_err();
        assert!(matches!(err, StrategyError::JobFailed(_)));
        assert!(cluster.active_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_run_succeeds_when_job_pod_already_completed() {
        let cluster = Arc::new(InMemoryCluster::new("https://a"));
        cluster.set_job_pod_phase(PodPhase::Succeeded);
        let task = task(
            endpoint(&cluster, "ns", "old", &[ReadWriteMany], None),
            endpoint(&cluster, "ns", "new", &[ReadWriteMany], None),
            quiet_options(),
        );
        let attempt = attempt(task, NAME);

        strategy().run(&attempt).await.unwrap();
        assert_eq!(cluster.created_jobs().len(), 1);
        assert!(cluster.active_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_job_output_reaches_renderer() {
        let cluster = Arc::new(InMemoryCluster::new("https://a"));
        cluster.set_job_logs(
            "sending incremental file list\n\
             \r      1,024  20%    1.00MB/s    0:00:01 (xfr#1, to-chk=4/5)\
             \r      5,120 100%    1.00MB/s    0:00:02 (xfr#5, to-chk=0/5)\n\
             sent 5,300 bytes  received 120 bytes\n",
        );
        let task = task(
            endpoint(&cluster, "ns", "old", &[ReadWriteMany], None),
            endpoint(&cluster, "ns", "new", &[ReadWriteMany], None),
            quiet_options(),
        );
        let attempt = attempt(task, NAME);
        let job = strategy().build_job(&attempt, None).unwrap();
        cluster.create_job(&job).await.unwrap();

        let renderer = RecordingRenderer::default();
        let client: Arc<dyn ClusterClient> = cluster.clone();
        follow_job(
            &client,
            "ns",
            &job.name,
            Some(Box::new(renderer.clone())),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let percents: Vec<u8> = renderer.updates.lock().iter().map(|p| p.percent).collect();
        assert_eq!(percents, vec![20, 100]);
        assert_eq!(*renderer.finished.lock(), vec![true]);
    }
}
