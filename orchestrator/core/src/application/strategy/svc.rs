// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-Cluster Service (`svc`)
//!
//! One release with two halves: an sshd pod mounting the source claim and an
//! rsync job mounting the destination claim that pulls from the sshd pod
//! through its cluster service. Works across namespaces of one cluster.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{finish_cleanup, follow_job, image_values, Strategy, StrategyContext, StrategyError};
use crate::application::attempt::Attempt;
use crate::application::cleanup::TrackedResource;
use crate::domain::task::Task;
use crate::infrastructure::keys::{create_key_pair, KeyPair};
use crate::infrastructure::transfer::{
    mount_path, retry_script, RsyncCommand, RsyncLocation, DEST_MOUNT, SOURCE_MOUNT,
};

pub const NAME: &str = "svc";
const PRIORITY: u32 = 2000;
const DEFAULT_SSH_PORT: u16 = 22;

pub struct ServiceStrategy {
    context: StrategyContext,
}

impl ServiceStrategy {
    pub fn new(context: StrategyContext) -> Self {
        Self { context }
    }

    /// Host the rsync job dials: the sshd service unless overridden.
    fn target_host(task: &Task, release: &str) -> String {
        match task.options().dest_host_override.as_deref() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => format!("{}-sshd.{}", release, task.source().namespace()),
        }
    }

    fn values(&self, task: &Task, release: &str, keys: &KeyPair) -> Result<Value, StrategyError> {
        let options = task.options();
        let config = &self.context.config;
        let source = task.source();
        let dest = task.dest();

        let mut command = RsyncCommand::new(
            RsyncLocation::remote(
                Self::target_host(task, release),
                mount_path(SOURCE_MOUNT, source.path()),
            ),
            RsyncLocation::local(mount_path(DEST_MOUNT, dest.path())),
        )
        .with_delete(options.delete_extraneous_files)
        .with_no_chown(options.no_chown);
        if config.tunnel.sshd_port != DEFAULT_SSH_PORT {
            command = command.with_ssh_port(config.tunnel.sshd_port);
        }
        let command = retry_script(
            &command.build()?,
            config.job.rsync_retries,
            config.job.rsync_retry_delay_seconds,
        );

        Ok(json!({
            "rsync": {
                "enabled": true,
                "namespace": dest.namespace(),
                "image": image_values(&config.images.rsync),
                "privateKeyMount": true,
                "privateKey": keys.private_key(),
                "privateKeyMountPath": keys.algorithm().private_key_mount_path(),
                "pvcMounts": [{
                    "name": dest.claim_name(),
                    "mountPath": DEST_MOUNT,
                }],
                "command": command,
                "affinity": dest.affinity_values(),
            },
            "sshd": {
                "enabled": true,
                "namespace": source.namespace(),
                "image": image_values(&config.images.sshd),
                "publicKey": keys.public_key(),
                "pvcMounts": [{
                    "name": source.claim_name(),
                    "mountPath": SOURCE_MOUNT,
                    "readOnly": options.source_mount_read_only,
                }],
                "affinity": source.affinity_values(),
            },
        }))
    }
}

#[async_trait]
impl Strategy for ServiceStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn priority(&self) -> u32 {
        PRIORITY
    }

    fn can_do(&self, task: &Task) -> bool {
        task.same_cluster()
    }

    async fn run(&self, attempt: &Attempt) -> Result<(), StrategyError> {
        let task = attempt.task();
        let release = attempt.release_name().to_string();

        info!(attempt = %attempt.id(), "Generating {} key pair", task.options().key_algorithm);
        let keys = create_key_pair(task.options().key_algorithm)?;
        let values = self.values(task, &release, &keys)?;

        let guard = attempt.cleanup().arm(attempt.cancel_token().clone());
        attempt
            .cleanup()
            .track(TrackedResource::Release {
                name: release.clone(),
                target: task.dest().clone(),
                deployer: self.context.deployer.clone(),
            })
            .await;

        let result: Result<(), StrategyError> = async {
            self.context
                .deployer
                .install(&release, task.dest(), values)
                .await?;
            follow_job(
                task.dest().cluster(),
                task.dest().namespace(),
                &format!("{}-rsync", release),
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
