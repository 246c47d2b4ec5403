// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cluster Capability - Anti-Corruption Layer for the Kubernetes API
//!
//! Strategies never talk to `kube` directly. They see a cluster as a small
//! set of operations: read claims and pods, run a batch job, follow logs and
//! open a byte stream to a pod port. Keeping the surface this narrow lets the
//! engine be exercised against an in-memory cluster.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::domain::endpoint::AccessMode;
use crate::domain::request::PvcInfo;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Failed to load kubeconfig: {0}")]
    Config(String),
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),
    #[error("Kubernetes API error: {0}")]
    Api(String),
}

/// Claim as seen by the capability resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimInfo {
    pub namespace: String,
    pub name: String,
    pub access_modes: Vec<AccessMode>,
}

/// A pod that references a claim in its volumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodMount {
    pub pod: String,
    /// Empty while the pod is not scheduled
    pub node: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimMount {
    pub claim: String,
    pub mount_path: String,
    pub read_only: bool,
}

/// Ephemeral batch job that runs a transfer script with both claims mounted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferJob {
    pub name: String,
    pub namespace: String,
    pub image: String,
    /// Passed to `sh -c`
    pub script: String,
    pub mounts: Vec<ClaimMount>,
    /// Pins the pod to a node; None lets the scheduler decide
    pub node_name: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub ttl_seconds_after_finished: i32,
    pub backoff_limit: i32,
    pub service_account: Option<String>,
}

impl TransferJob {
    /// Label selector matching the pod the job controller creates.
    pub fn pod_selector(&self) -> String {
        format!("job-name={}", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
}

/// Bidirectional byte stream to a port inside a pod.
pub trait PortStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> PortStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Raw output of a container, stdout and stderr interleaved.
pub type LogReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Control plane address; two handles with the same host talk to the same cluster.
    fn host(&self) -> &str;

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<ClaimInfo, ClusterError>;

    async fn list_pods_mounting_claim(
        &self,
        namespace: &str,
        claim: &str,
    ) -> Result<Vec<PodMount>, ClusterError>;

    async fn create_job(&self, job: &TransferJob) -> Result<(), ClusterError>;

    /// Deletes a job and its pods. Deleting a missing job is not an error.
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Waits for a pod matching `label_selector` to be running.
    async fn wait_for_pod(
        &self,
        namespace: &str,
        label_selector: &str,
        timeout: Duration,
    ) -> Result<PodRef, ClusterError>;

    /// Waits for the pod of a job to leave `Pending`. A pod that already
    /// succeeded or failed is returned too, its logs stay readable.
    async fn wait_for_job_pod(
        &self,
        namespace: &str,
        label_selector: &str,
        timeout: Duration,
    ) -> Result<PodRef, ClusterError>;

    /// Follows the combined output of a pod until its container exits.
    async fn follow_logs(&self, pod: &PodRef) -> Result<LogReader, ClusterError>;

    /// Waits until a job either succeeds or fails.
    async fn wait_for_job(&self, namespace: &str, name: &str) -> Result<JobOutcome, ClusterError>;

    /// Opens one stream to `port` on the pod.
    async fn connect_port(&self, pod: &PodRef, port: u16) -> Result<Box<dyn PortStream>, ClusterError>;
}

/// Turns a claim location into a client for the cluster it lives in.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Returns the client and the namespace to use when the request left it empty.
    async fn connect(&self, pvc: &PvcInfo) -> Result<(Arc<dyn ClusterClient>, String), ClusterError>;
}
