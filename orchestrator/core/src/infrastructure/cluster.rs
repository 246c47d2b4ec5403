// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cluster Adapters
//!
//! [`KubeCluster`] implements the cluster capability on top of `kube`.
//! [`InMemoryCluster`] keeps claims, pods and jobs in a map and is what the
//! engine and strategy tests run against.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaim, PersistentVolumeClaimVolumeSource, Pod, PodSpec,
    PodTemplateSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::wait::await_condition;
use kube::{Client, Config};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::oneshot;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, info, warn};

use crate::domain::cluster::{
    ClaimInfo, ClusterClient, ClusterConnector, ClusterError, JobOutcome, LogReader, PodMount,
    PodRef, PortStream, TransferJob,
};
use crate::domain::endpoint::AccessMode;
use crate::domain::request::PvcInfo;

const POD_POLL_INTERVAL: Duration = Duration::from_secs(1);
const LOG_BUFFER_SIZE: usize = 64 * 1024;

fn api_error(e: kube::Error) -> ClusterError {
    ClusterError::Api(e.to_string())
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(response) if response.code == 404)
}

/// Cluster capability backed by the Kubernetes API.
pub struct KubeCluster {
    client: Client,
    host: String,
}

impl KubeCluster {
    /// Builds a client from a kubeconfig file (or the default lookup when
    /// `path` is None) and an optional context. Returns the client and the
    /// context's default namespace.
    pub async fn from_kubeconfig(
        path: Option<&Path>,
        context: Option<&str>,
    ) -> Result<(Self, String), ClusterError> {
        let options = KubeConfigOptions {
            context: context.map(str::to_string),
            ..Default::default()
        };

        let config = match path {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    ClusterError::Config(format!("Failed to read kubeconfig {:?}: {}", path, e))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &options).await
            }
            None => Config::from_kubeconfig(&options).await,
        }
        .map_err(|e| ClusterError::Config(e.to_string()))?;

        let host = config.cluster_url.to_string();
        let namespace = config.default_namespace.clone();
        let client = Client::try_from(config)
            .map_err(|e| ClusterError::Config(format!("Failed to create client: {}", e)))?;

        debug!("Connected to cluster {} (default namespace {})", host, namespace);
        Ok((Self { client, host }, namespace))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Polls until a pod matching `label_selector` is in a phase `accept` allows.
    async fn poll_pod(
        &self,
        namespace: &str,
        label_selector: &str,
        timeout: Duration,
        accept: fn(&str) -> bool,
    ) -> Result<PodRef, ClusterError> {
        let api = self.pods(namespace);
        let params = ListParams::default().labels(label_selector);

        let poll = async {
            loop {
                let pods = api.list(&params).await.map_err(api_error)?;
                let found = pods.items.into_iter().find(|pod| {
                    pod.status
                        .as_ref()
                        .and_then(|s| s.phase.as_deref())
                        .is_some_and(accept)
                });
                if let Some(name) = found.and_then(|pod| pod.metadata.name) {
                    return Ok(PodRef {
                        namespace: namespace.to_string(),
                        name,
                    });
                }
                tokio::time::sleep(POD_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(timeout, poll).await.map_err(|_| {
            ClusterError::Timeout(timeout, format!("pod {} in {}", label_selector, namespace))
        })?
    }
}

fn build_job(job: &TransferJob) -> Job {
    let mut volumes = Vec::with_capacity(job.mounts.len());
    let mut volume_mounts = Vec::with_capacity(job.mounts.len());
    for (index, mount) in job.mounts.iter().enumerate() {
        let name = format!("vol-{}", index);
        volumes.push(Volume {
            name: name.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: mount.claim.clone(),
                read_only: Some(mount.read_only),
            }),
            ..Default::default()
        });
        volume_mounts.push(VolumeMount {
            name,
            mount_path: mount.mount_path.clone(),
            read_only: Some(mount.read_only),
            ..Default::default()
        });
    }

    Job {
        metadata: ObjectMeta {
            name: Some(job.name.clone()),
            namespace: Some(job.namespace.clone()),
            labels: Some(job.labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(job.backoff_limit),
            ttl_seconds_after_finished: Some(job.ttl_seconds_after_finished),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(job.labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "app".to_string(),
                        image: Some(job.image.clone()),
                        command: Some(vec![
                            "sh".to_string(),
                            "-c".to_string(),
                            job.script.clone(),
                        ]),
                        volume_mounts: Some(volume_mounts),
                        ..Default::default()
                    }],
                    volumes: Some(volumes),
                    node_name: job.node_name.clone(),
                    restart_policy: Some("Never".to_string()),
                    service_account_name: job.service_account.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pod_is_terminated(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

#[async_trait]
impl ClusterClient for KubeCluster {
    fn host(&self) -> &str {
        &self.host
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<ClaimInfo, ClusterError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let claim = api.get(name).await.map_err(|e| {
            if is_not_found(&e) {
                ClusterError::NotFound {
                    kind: "PersistentVolumeClaim",
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                }
            } else {
                api_error(e)
            }
        })?;

        let access_modes = claim
            .spec
            .and_then(|spec| spec.access_modes)
            .unwrap_or_default()
            .iter()
            .filter_map(|mode| match mode.parse::<AccessMode>() {
                Ok(mode) => Some(mode),
                Err(e) => {
                    warn!("Ignoring access mode of {}/{}: {}", namespace, name, e);
                    None
                }
            })
            .collect();

        Ok(ClaimInfo {
            namespace: namespace.to_string(),
            name: name.to_string(),
            access_modes,
        })
    }

    async fn list_pods_mounting_claim(
        &self,
        namespace: &str,
        claim: &str,
    ) -> Result<Vec<PodMount>, ClusterError> {
        let pods = self
            .pods(namespace)
            .list(&ListParams::default())
            .await
            .map_err(api_error)?;

        Ok(pods
            .items
            .into_iter()
            .filter(|pod| !pod_is_terminated(pod))
            .filter_map(|pod| {
                let spec = pod.spec?;
                let mounts_claim = spec.volumes.unwrap_or_default().iter().any(|volume| {
                    volume
                        .persistent_volume_claim
                        .as_ref()
                        .is_some_and(|source| source.claim_name == claim)
                });
                mounts_claim.then(|| PodMount {
                    pod: pod.metadata.name.unwrap_or_default(),
                    node: spec.node_name.unwrap_or_default(),
                })
            })
            .collect())
    }

    async fn create_job(&self, job: &TransferJob) -> Result<(), ClusterError> {
        info!("Creating job {}/{}", job.namespace, job.name);
        self.jobs(&job.namespace)
            .create(&PostParams::default(), &build_job(job))
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        match self
            .jobs(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => {
                debug!("Deleted job {}/{}", namespace, name);
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(api_error(e)),
        }
    }

    async fn wait_for_pod(
        &self,
        namespace: &str,
        label_selector: &str,
        timeout: Duration,
    ) -> Result<PodRef, ClusterError> {
        self.poll_pod(namespace, label_selector, timeout, |phase| phase == "Running")
            .await
    }

    async fn wait_for_job_pod(
        &self,
        namespace: &str,
        label_selector: &str,
        timeout: Duration,
    ) -> Result<PodRef, ClusterError> {
        // A short job can go from Pending to Succeeded between two polls
        self.poll_pod(namespace, label_selector, timeout, |phase| {
            matches!(phase, "Running" | "Succeeded" | "Failed")
        })
        .await
    }

    async fn follow_logs(&self, pod: &PodRef) -> Result<LogReader, ClusterError> {
        let api = self.pods(&pod.namespace);
        let name = pod.name.clone();
        let (opened_tx, opened_rx) = oneshot::channel();
        let (mut writer, reader) = tokio::io::duplex(LOG_BUFFER_SIZE);

        // The log stream borrows its Api, so both live on the copying task
        tokio::spawn(async move {
            let params = LogParams {
                follow: true,
                ..Default::default()
            };
            match api.log_stream(&name, &params).await {
                Ok(stream) => {
                    let _ = opened_tx.send(Ok(()));
                    let mut stream = Box::pin(stream).compat();
                    if let Err(e) = tokio::io::copy(&mut stream, &mut writer).await {
                        debug!("Log stream of {} ended: {}", name, e);
                    }
                }
                Err(e) => {
                    let _ = opened_tx.send(Err(api_error(e)));
                }
            }
        });

        opened_rx
            .await
            .map_err(|_| ClusterError::Api(format!("log stream of {} closed", pod.name)))??;
        Ok(Box::new(reader))
    }

    async fn wait_for_job(&self, namespace: &str, name: &str) -> Result<JobOutcome, ClusterError> {
        let finished = |job: Option<&Job>| {
            job.and_then(|j| j.status.as_ref()).is_some_and(|status| {
                status.succeeded.unwrap_or(0) > 0 || status.failed.unwrap_or(0) > 0
            })
        };

        let job = await_condition(self.jobs(namespace), name, finished)
            .await
            .map_err(|e| ClusterError::Api(e.to_string()))?
            .ok_or_else(|| ClusterError::NotFound {
                kind: "Job",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        let succeeded = job
            .status
            .and_then(|s| s.succeeded)
            .unwrap_or(0)
            > 0;
        Ok(if succeeded {
            JobOutcome::Succeeded
        } else {
            JobOutcome::Failed
        })
    }

    async fn connect_port(
        &self,
        pod: &PodRef,
        port: u16,
    ) -> Result<Box<dyn PortStream>, ClusterError> {
        let mut forwarder = self
            .pods(&pod.namespace)
            .portforward(&pod.name, &[port])
            .await
            .map_err(api_error)?;
        let stream = forwarder.take_stream(port).ok_or_else(|| {
            ClusterError::Api(format!(
                "port-forward to {}/{}:{} returned no stream",
                pod.namespace, pod.name, port
            ))
        })?;
        Ok(Box::new(ForwardedStream {
            stream,
            _forwarder: forwarder,
        }))
    }
}

/// Keeps the websocket forwarder alive for as long as its stream is used.
struct ForwardedStream<S> {
    stream: S,
    _forwarder: kube::api::Portforwarder,
}

impl<S: AsyncRead + Unpin> AsyncRead for ForwardedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ForwardedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// Opens a [`KubeCluster`] per claim location.
#[derive(Debug, Default, Clone)]
pub struct KubeConnector;

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(
        &self,
        pvc: &PvcInfo,
    ) -> Result<(Arc<dyn ClusterClient>, String), ClusterError> {
        let (cluster, namespace) =
            KubeCluster::from_kubeconfig(pvc.kubeconfig_path.as_deref(), pvc.context.as_deref())
                .await?;
        Ok((Arc::new(cluster), namespace))
    }
}

// ============================================================================
// In-memory cluster
// ============================================================================

type Key = (String, String);

/// Phase an in-memory job pod reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Default)]
struct InMemoryState {
    claims: HashMap<Key, ClaimInfo>,
    /// (namespace, pod) -> (node, claims)
    pods: BTreeMap<Key, (String, Vec<String>)>,
    /// (namespace, label selector) -> pod
    ready_pods: HashMap<Key, String>,
    jobs: BTreeMap<Key, TransferJob>,
    created_jobs: Vec<TransferJob>,
    deleted_jobs: Vec<Key>,
    job_outcome: Option<JobOutcome>,
    job_pod_phase: Option<PodPhase>,
    job_logs: Vec<u8>,
    echo_ports: HashSet<(String, String, u16)>,
}

/// Cluster kept entirely in memory.
///
/// Jobs "complete" as soon as they are waited on, with the outcome set by
/// [`InMemoryCluster::set_job_outcome`] (success by default). Ports only
/// answer after [`InMemoryCluster::serve_echo`].
pub struct InMemoryCluster {
    host: String,
    state: Mutex<InMemoryState>,
}

impl InMemoryCluster {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            state: Mutex::new(InMemoryState::default()),
        }
    }

    pub fn with_claim(self, namespace: &str, name: &str, access_modes: &[AccessMode]) -> Self {
        self.state.lock().claims.insert(
            (namespace.to_string(), name.to_string()),
            ClaimInfo {
                namespace: namespace.to_string(),
                name: name.to_string(),
                access_modes: access_modes.to_vec(),
            },
        );
        self
    }

    /// Adds a pod on `node` mounting `claim`.
    pub fn with_pod(self, namespace: &str, pod: &str, node: &str, claim: &str) -> Self {
        {
            let mut state = self.state.lock();
            let entry = state
                .pods
                .entry((namespace.to_string(), pod.to_string()))
                .or_insert_with(|| (node.to_string(), Vec::new()));
            entry.1.push(claim.to_string());
        }
        self
    }

    /// Makes `wait_for_pod(namespace, selector)` return `pod`.
    pub fn add_ready_pod(&self, namespace: &str, label_selector: &str, pod: &str) {
        self.state.lock().ready_pods.insert(
            (namespace.to_string(), label_selector.to_string()),
            pod.to_string(),
        );
    }

    /// Makes `port` of `pod` answer, echoing back everything written to it.
    pub fn serve_echo(&self, pod: &PodRef, port: u16) {
        self.state
            .lock()
            .echo_ports
            .insert((pod.namespace.clone(), pod.name.clone(), port));
    }

    /// Phase of every job pod (running by default).
    pub fn set_job_pod_phase(&self, phase: PodPhase) {
        self.state.lock().job_pod_phase = Some(phase);
    }

    pub fn set_job_outcome(&self, outcome: JobOutcome) {
        self.state.lock().job_outcome = Some(outcome);
    }

    /// Output every job pod will report.
    pub fn set_job_logs(&self, logs: impl Into<Vec<u8>>) {
        self.state.lock().job_logs = logs.into();
    }

    pub fn created_jobs(&self) -> Vec<TransferJob> {
        self.state.lock().created_jobs.clone()
    }

    /// Jobs created and not deleted yet
    pub fn active_jobs(&self) -> Vec<TransferJob> {
        self.state.lock().jobs.values().cloned().collect()
    }

    pub fn deleted_jobs(&self) -> Vec<(String, String)> {
        self.state.lock().deleted_jobs.clone()
    }

    /// Pods registered with [`InMemoryCluster::add_ready_pod`] always match;
    /// job pods match when their phase is accepted.
    fn find_pod(
        &self,
        namespace: &str,
        label_selector: &str,
        timeout: Duration,
        accept: fn(PodPhase) -> bool,
    ) -> Result<PodRef, ClusterError> {
        let state = self.state.lock();
        let key = (namespace.to_string(), label_selector.to_string());
        if let Some(pod) = state.ready_pods.get(&key) {
            return Ok(PodRef {
                namespace: namespace.to_string(),
                name: pod.clone(),
            });
        }
        let phase = state.job_pod_phase.unwrap_or(PodPhase::Running);
        state
            .jobs
            .values()
            .find(|job| job.namespace == namespace && job.pod_selector() == label_selector)
            .filter(|_| accept(phase))
            .map(|job| PodRef {
                namespace: namespace.to_string(),
                name: format!("{}-pod", job.name),
            })
            .ok_or_else(|| {
                ClusterError::Timeout(timeout, format!("pod {} in {}", label_selector, namespace))
            })
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    fn host(&self) -> &str {
        &self.host
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<ClaimInfo, ClusterError> {
        self.state
            .lock()
            .claims
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "PersistentVolumeClaim",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn list_pods_mounting_claim(
        &self,
        namespace: &str,
        claim: &str,
    ) -> Result<Vec<PodMount>, ClusterError> {
        Ok(self
            .state
            .lock()
            .pods
            .iter()
            .filter(|((ns, _), (_, claims))| ns == namespace && claims.iter().any(|c| c == claim))
            .map(|((_, pod), (node, _))| PodMount {
                pod: pod.clone(),
                node: node.clone(),
            })
            .collect())
    }

    async fn create_job(&self, job: &TransferJob) -> Result<(), ClusterError> {
        let mut state = self.state.lock();
        let key = (job.namespace.clone(), job.name.clone());
        if state.jobs.contains_key(&key) {
            return Err(ClusterError::Api(format!("job {} already exists", job.name)));
        }
        state.jobs.insert(key, job.clone());
        state.created_jobs.push(job.clone());
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock();
        let key = (namespace.to_string(), name.to_string());
        if state.jobs.remove(&key).is_some() {
            state.deleted_jobs.push(key);
        }
        Ok(())
    }

    async fn wait_for_pod(
        &self,
        namespace: &str,
        label_selector: &str,
        timeout: Duration,
    ) -> Result<PodRef, ClusterError> {
        self.find_pod(namespace, label_selector, timeout, |phase| {
            phase == PodPhase::Running
        })
    }

    async fn wait_for_job_pod(
        &self,
        namespace: &str,
        label_selector: &str,
        timeout: Duration,
    ) -> Result<PodRef, ClusterError> {
        self.find_pod(namespace, label_selector, timeout, |phase| {
            phase != PodPhase::Pending
        })
    }

    async fn follow_logs(&self, _pod: &PodRef) -> Result<LogReader, ClusterError> {
        let logs = self.state.lock().job_logs.clone();
        Ok(Box::new(std::io::Cursor::new(logs)))
    }

    async fn wait_for_job(&self, namespace: &str, name: &str) -> Result<JobOutcome, ClusterError> {
        let state = self.state.lock();
        if !state.jobs.contains_key(&(namespace.to_string(), name.to_string())) {
            return Err(ClusterError::NotFound {
                kind: "Job",
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        Ok(state.job_outcome.unwrap_or(JobOutcome::Succeeded))
    }

    async fn connect_port(
        &self,
        pod: &PodRef,
        port: u16,
    ) -> Result<Box<dyn PortStream>, ClusterError> {
        let serving = self
            .state
            .lock()
            .echo_ports
            .contains(&(pod.namespace.clone(), pod.name.clone(), port));
        if !serving {
            return Err(ClusterError::Api(format!(
                "connection refused: {}/{}:{}",
                pod.namespace, pod.name, port
            )));
        }

        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(server);
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        });
        Ok(Box::new(client))
    }
}

/// Hands out in-memory clusters by kubeconfig context.
#[derive(Default)]
pub struct InMemoryConnector {
    clusters: HashMap<Option<String>, (Arc<InMemoryCluster>, String)>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `cluster` for `context` (None = no context given).
    pub fn with_cluster(
        mut self,
        context: Option<&str>,
        cluster: Arc<InMemoryCluster>,
        default_namespace: &str,
    ) -> Self {
        self.clusters.insert(
            context.map(str::to_string),
            (cluster, default_namespace.to_string()),
        );
        self
    }
}

#[async_trait]
impl ClusterConnector for InMemoryConnector {
    async fn connect(
        &self,
        pvc: &PvcInfo,
    ) -> Result<(Arc<dyn ClusterClient>, String), ClusterError> {
        let (cluster, namespace) = self.clusters.get(&pvc.context).ok_or_else(|| {
            ClusterError::Config(format!(
                "context {} does not exist",
                pvc.context.as_deref().unwrap_or("<current>")
            ))
        })?;
        Ok((cluster.clone() as Arc<dyn ClusterClient>, namespace.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cluster::ClaimMount;

    fn transfer_job() -> TransferJob {
        TransferJob {
            name: "pv-migrate-abcde-rsync".to_string(),
            namespace: "ns".to_string(),
            image: "rsync:latest".to_string(),
            script: "rsync /source/ /dest/".to_string(),
            mounts: vec![
                ClaimMount {
                    claim: "old".to_string(),
                    mount_path: "/source".to_string(),
                    read_only: true,
                },
                ClaimMount {
                    claim: "new".to_string(),
                    mount_path: "/dest".to_string(),
                    read_only: false,
                },
            ],
            node_name: Some("node-1".to_string()),
            labels: BTreeMap::from([("app.kubernetes.io/instance".to_string(), "pv-migrate-abcde".to_string())]),
            ttl_seconds_after_finished: 600,
            backoff_limit: 0,
            service_account: None,
        }
    }

    #[test]
    fn test_build_job_manifest() {
        let job = build_job(&transfer_job());
        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        assert_eq!(spec.ttl_seconds_after_finished, Some(600));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.node_name.as_deref(), Some("node-1"));

        let volumes = pod.volumes.unwrap();
        assert_eq!(volumes.len(), 2);
        let source = volumes[0].persistent_volume_claim.as_ref().unwrap();
        assert_eq!(source.claim_name, "old");
        assert_eq!(source.read_only, Some(true));

        let container = &pod.containers[0];
        assert_eq!(
            container.command.as_ref().unwrap(),
            &vec!["sh".to_string(), "-c".to_string(), "rsync /source/ /dest/".to_string()]
        );
        let mounts = container.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[1].mount_path, "/dest");
        assert_eq!(mounts[1].read_only, Some(false));
    }

    #[tokio::test]
    async fn test_in_memory_pods_mounting_claim() {
        let cluster = InMemoryCluster::new("https://a")
            .with_pod("ns", "web-0", "node-1", "data")
            .with_pod("ns", "web-1", "node-2", "other")
            .with_pod("other-ns", "web-2", "node-3", "data");

        let mounts = cluster.list_pods_mounting_claim("ns", "data").await.unwrap();
        assert_eq!(
            mounts,
            vec![PodMount {
                pod: "web-0".to_string(),
                node: "node-1".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_in_memory_job_lifecycle() {
        let cluster = InMemoryCluster::new("https://a");
        let job = transfer_job();
        cluster.create_job(&job).await.unwrap();
        assert!(cluster.create_job(&job).await.is_err());

        let pod = cluster
            .wait_for_pod("ns", &job.pod_selector(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(pod.name, "pv-migrate-abcde-rsync-pod");
        assert_eq!(
            cluster.wait_for_job("ns", &job.name).await.unwrap(),
            JobOutcome::Succeeded
        );

        cluster.delete_job("ns", &job.name).await.unwrap();
        cluster.delete_job("ns", &job.name).await.unwrap();
        assert!(cluster.active_jobs().is_empty());
        assert_eq!(cluster.deleted_jobs().len(), 1);
    }

    #[tokio::test]
    async fn test_completed_job_pod_is_still_found() {
        let cluster = InMemoryCluster::new("https://a");
        let job = transfer_job();
        cluster.create_job(&job).await.unwrap();
        cluster.set_job_pod_phase(PodPhase::Succeeded);

        let err = cluster
            .wait_for_pod("ns", &job.pod_selector(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Timeout(..)));

        let pod = cluster
            .wait_for_job_pod("ns", &job.pod_selector(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(pod.name, "pv-migrate-abcde-rsync-pod");

        cluster.set_job_pod_phase(PodPhase::Pending);
        assert!(cluster
            .wait_for_job_pod("ns", &job.pod_selector(), Duration::from_secs(1))
            .await
            .is_err());
    }
}
