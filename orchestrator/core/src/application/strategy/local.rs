// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Local Relay (`local`)
//!
//! The fallback that works between any two clusters the operator can reach.
//! An sshd pod is stood up next to each claim and both are port-forwarded to
//! this machine. A local `ssh` session into the source pod opens a reverse
//! forward back to the destination's port-forward, and rsync inside the
//! source pod pushes through it.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

use super::{finish_cleanup, image_values, Strategy, StrategyContext, StrategyError};
use crate::application::attempt::Attempt;
use crate::application::cleanup::TrackedResource;
use crate::domain::cluster::{LogReader, PodRef};
use crate::domain::endpoint::VolumeEndpoint;
use crate::domain::task::Task;
use crate::infrastructure::keys::{create_key_pair, KeyPair};
use crate::infrastructure::ssh::{ensure_binary, ReverseTunnel, SSH_BINARY};
use crate::infrastructure::transfer::{
    mount_path, ProgressTail, RsyncCommand, RsyncLocation, TransferError, DEST_MOUNT,
    SOURCE_MOUNT,
};
use crate::infrastructure::tunnel::port_forward;

pub const NAME: &str = "local";
const PRIORITY: u32 = 3000;
const SSHD_COMPONENT: &str = "sshd";

pub struct LocalRelay {
    context: StrategyContext,
    ssh_binary: String,
}

impl LocalRelay {
    pub fn new(context: StrategyContext) -> Self {
        Self {
            context,
            ssh_binary: SSH_BINARY.to_string(),
        }
    }

    /// Uses `binary` (looked up on `PATH`) instead of `ssh`.
    pub fn with_ssh_binary(mut self, binary: impl Into<String>) -> Self {
        self.ssh_binary = binary.into();
        self
    }

    fn source_values(&self, task: &Task, keys: &KeyPair) -> Value {
        let source = task.source();
        json!({
            "sshd": {
                "enabled": true,
                "namespace": source.namespace(),
                "image": image_values(&self.context.config.images.sshd),
                "publicKey": keys.public_key(),
                "privateKeyMount": true,
                "privateKey": keys.private_key(),
                "privateKeyMountPath": keys.algorithm().private_key_mount_path(),
                "pvcMounts": [{
                    "name": source.claim_name(),
                    "mountPath": SOURCE_MOUNT,
                    "readOnly": task.options().source_mount_read_only,
                }],
                "affinity": source.affinity_values(),
            },
        })
    }

    fn dest_values(&self, task: &Task, keys: &KeyPair) -> Value {
        let dest = task.dest();
        json!({
            "sshd": {
                "enabled": true,
                "namespace": dest.namespace(),
                "image": image_values(&self.context.config.images.sshd),
                "publicKey": keys.public_key(),
                "pvcMounts": [{
                    "name": dest.claim_name(),
                    "mountPath": DEST_MOUNT,
                }],
                "affinity": dest.affinity_values(),
            },
        })
    }

    /// Waits for the sshd pod of `release` and forwards its ssh port.
    async fn forward_sshd(
        &self,
        attempt: &Attempt,
        endpoint: &VolumeEndpoint,
        release: &str,
    ) -> Result<u16, StrategyError> {
        let selector = Attempt::release_selector(SSHD_COMPONENT, release);
        let pod: PodRef = endpoint
            .cluster()
            .wait_for_pod(endpoint.namespace(), &selector, self.context.pod_ready_timeout())
            .await?;

        let tunnel = &self.context.config.tunnel;
        let forward = port_forward(
            endpoint.cluster().clone(),
            pod,
            tunnel.sshd_port,
            tunnel.port_forward_timeout(),
        )
        .await?;
        let local_port = forward.local_port();
        attempt
            .cleanup()
            .track(TrackedResource::Tunnel(forward))
            .await;
        Ok(local_port)
    }

    async fn relay(
        &self,
        attempt: &Attempt,
        ssh: PathBuf,
        keys: &KeyPair,
        source_release: &str,
        dest_release: &str,
    ) -> Result<(), StrategyError> {
        let task = attempt.task();
        let deployer = &self.context.deployer;

        deployer
            .install(source_release, task.source(), self.source_values(task, keys))
            .await?;
        deployer
            .install(dest_release, task.dest(), self.dest_values(task, keys))
            .await?;

        let source_port = self.forward_sshd(attempt, task.source(), source_release).await?;
        let dest_port = self.forward_sshd(attempt, task.dest(), dest_release).await?;

        let key_file = keys.write_private_key()?;
        let identity_file = key_file.to_path_buf();
        attempt
            .cleanup()
            .track(TrackedResource::KeyFile(key_file))
            .await;

        let reverse_port = self.context.config.tunnel.reverse_tunnel_port;
        let command = RsyncCommand::new(
            RsyncLocation::local(mount_path(SOURCE_MOUNT, task.source().path())),
            RsyncLocation::remote("localhost", mount_path(DEST_MOUNT, task.dest().path())),
        )
        .with_ssh_port(reverse_port)
        .with_delete(task.options().delete_extraneous_files)
        .with_no_chown(task.options().no_chown)
        .build()?;

        info!(
            attempt = %attempt.id(),
            "Relaying through 127.0.0.1:{} -> 127.0.0.1:{}", source_port, dest_port
        );
        let mut child = ReverseTunnel::new(&identity_file, source_port, reverse_port, dest_port)
            .with_binary(ssh)
            .spawn(&command)?;

        let mut readers: Vec<LogReader> = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(Box::new(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(Box::new(stderr));
        }
        let tail = ProgressTail::spawn(readers, self.context.progress_renderer(task.options()));

        let status = child.wait().await.map_err(TransferError::Io);
        let succeeded = matches!(&status, Ok(s) if s.success());
        tail.finish(succeeded).await;

        let status = status?;
        if !status.success() {
            return Err(TransferError::Failed(status.to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl Strategy for LocalRelay {
    fn name(&self) -> &str {
        NAME
    }

    fn priority(&self) -> u32 {
        PRIORITY
    }

    fn can_do(&self, _task: &Task) -> bool {
        true
    }

    async fn run(&self, attempt: &Attempt) -> Result<(), StrategyError> {
        let ssh = ensure_binary(&self.ssh_binary)?;
        let task = attempt.task();

        info!(attempt = %attempt.id(), "Generating {} key pair", task.options().key_algorithm);
        let keys = create_key_pair(task.options().key_algorithm)?;

        let source_release = attempt.resource_name("src");
        let dest_release = attempt.resource_name("dest");

        let guard = attempt.cleanup().arm(attempt.cancel_token().clone());
        for (release, target) in [(&source_release, task.source()), (&dest_release, task.dest())] {
            attempt
                .cleanup()
                .track(TrackedResource::Release {
                    name: release.clone(),
                    target: target.clone(),
                    deployer: self.context.deployer.clone(),
                })
                .await;
        }

        let result = self
            .relay(attempt, ssh, &keys, &source_release, &dest_release)
            .await;

        finish_cleanup(guard, attempt).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::domain::cluster::ClusterError;
    use crate::domain::endpoint::AccessMode::*;
    use crate::infrastructure::cluster::InMemoryCluster;
    use std::sync::Arc;

    fn uninstalled(deployer: &RecordingDeployer) -> Vec<String> {
        deployer
            .calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                DeployCall::Uninstall { release } => Some(release.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_can_always_do() {
        let a = Arc::new(InMemoryCluster::new("https://a"));
        let b = Arc::new(InMemoryCluster::new("https://b"));
        let s = LocalRelay::new(context(Arc::new(RecordingDeployer::default())));
        let t = task(
            endpoint(&a, "ns", "old", &[ReadWriteOnce], Some("node-1")),
            endpoint(&b, "ns", "new", &[ReadWriteOnce], Some("node-2")),
            quiet_options(),
        );
        assert!(s.can_do(&t));
    }

    #[tokio::test]
    async fn test_missing_ssh_provisions_nothing() {
        let cluster = Arc::new(InMemoryCluster::new("https://a"));
        let deployer = Arc::new(RecordingDeployer::default());
        let s = LocalRelay::new(context(deployer.clone()))
            .with_ssh_binary("pv-migrate-definitely-not-installed");
        let attempt = attempt(
            task(
                endpoint(&cluster, "ns", "old", &[ReadWriteOnce], None),
                endpoint(&cluster, "ns", "new", &[ReadWriteOnce], None),
                quiet_options(),
            ),
            NAME,
        );

        let err = s.run(&attempt).await.unwrap_err();
        assert!(matches!(
            err,
            StrategyError::Transfer(TransferError::BinaryNotFound(_))
        ));
        assert!(deployer.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_install_uninstalls_both_releases() {
        let cluster = Arc::new(InMemoryCluster::new("https://a"));
        let deployer = Arc::new(RecordingDeployer {
            fail_install: true,
            ..Default::default()
        });
        let s = LocalRelay::new(context(deployer.clone())).with_ssh_binary("sh");
        let attempt = attempt(
            task(
                endpoint(&cluster, "ns", "old", &[ReadWriteOnce], None),
                endpoint(&cluster, "ns", "new", &[ReadWriteOnce], None),
                quiet_options(),
            ),
            NAME,
        );

        let err = s.run(&attempt).await.unwrap_err();
        assert!(matches!(err, StrategyError::Deploy(_)));

        let mut released = uninstalled(&deployer);
        released.sort();
        assert_eq!(
            released,
            vec![attempt.resource_name("dest"), attempt.resource_name("src")]
        );
    }

    #[tokio::test]
    async fn test_unready_dest_pod_releases_everything() {
        let cluster = Arc::new(InMemoryCluster::new("https://a"));
        let deployer = Arc::new(RecordingDeployer::default());
        let s = LocalRelay::new(context(deployer.clone())).with_ssh_binary("sh");
        let attempt = attempt(
            task(
                endpoint(&cluster, "src-ns", "old", &[ReadWriteOnce], None),
                endpoint(&cluster, "dest-ns", "new", &[ReadWriteOnce], None),
                quiet_options(),
            ),
            NAME,
        );

        let source_release = attempt.resource_name("src");
        let source_pod = PodRef {
            namespace: "src-ns".to_string(),
            name: format!("{}-sshd", source_release),
        };
        cluster.add_ready_pod(
            "src-ns",
            &Attempt::release_selector("sshd", &source_release),
            &source_pod.name,
        );
        cluster.serve_echo(&source_pod, 22);

        let err = s.run(&attempt).await.unwrap_err();
        assert!(matches!(
            err,
            StrategyError::Cluster(ClusterError::Timeout(..))
        ));
        assert_eq!(attempt.cleanup().tracked().await, 0);
        assert_eq!(uninstalled(&deployer).len(), 2);

        let calls = deployer.calls.lock().clone();
        match &calls[0] {
            DeployCall::Install {
                release,
                namespace,
                values,
            } => {
                assert_eq!(release, &source_release);
                assert_eq!(namespace, "src-ns");
                assert_eq!(values["sshd"]["privateKeyMount"], true);
                assert_eq!(values["sshd"]["pvcMounts"][0]["mountPath"], "/source");
            }
            other => panic!("unexpected call: {other:?}"),
        }
        match &calls[1] {
            DeployCall::Install { values, .. } => {
                assert!(values["sshd"].get("privateKey").is_none());
                assert_eq!(values["sshd"]["pvcMounts"][0]["mountPath"], "/dest");
            }
            other => panic!("unexpected call: {other:?}"),
        }
    }
}
