// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Port Forwarding
//!
//! Exposes a port of a pod on `127.0.0.1:<ephemeral>` of the invoking
//! machine. Every accepted local connection gets its own stream to the pod
//! through the cluster capability.
//!
//! The forward runs on its own task and talks to the caller over two
//! channels only: a ready signal (sent once, when the pod port first
//! answers) and a stop signal (sent once, by [`PortForward::stop`] or on
//! drop).

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::cluster::{ClusterClient, PodRef};

const PROBE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Failed to bind local port: {0}")]
    Bind(#[source] std::io::Error),
    #[error("Timed out after {timeout:?} waiting for port-forward to {namespace}/{pod}:{port} to be ready")]
    Timeout {
        namespace: String,
        pod: String,
        port: u16,
        timeout: Duration,
    },
    #[error("Port-forward to {0} stopped before it became ready")]
    Closed(String),
}

/// A running forward. Dropping it stops the forward.
#[derive(Debug)]
pub struct PortForward {
    local_port: u16,
    target: String,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PortForward {
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// `namespace/pod:port` of the forwarded endpoint
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Stops the forward and waits for its accept loop to exit.
    pub async fn stop(mut self) {
        self.signal_stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Port-forward task for {} ended abnormally: {}", self.target, e);
            }
        }
    }

    fn signal_stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            // Receiver is gone if the loop already exited
            let _ = stop.send(());
            debug!("Stopped port-forward 127.0.0.1:{} -> {}", self.local_port, self.target);
        }
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

/// Forwards a free local port to `remote_port` of `pod`.
///
/// Returns once the pod port accepts a connection, or fails with
/// [`TunnelError::Timeout`] after `ready_timeout`.
pub async fn port_forward(
    cluster: Arc<dyn ClusterClient>,
    pod: PodRef,
    remote_port: u16,
    ready_timeout: Duration,
) -> Result<PortForward, TunnelError> {
    let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
        .await
        .map_err(TunnelError::Bind)?;
    let local_port = listener.local_addr().map_err(TunnelError::Bind)?.port();
    let target = format!("{}/{}:{}", pod.namespace, pod.name, remote_port);

    let (ready_tx, ready_rx) = oneshot::channel::<()>();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(run_forward(
        cluster,
        pod.clone(),
        remote_port,
        listener,
        ready_tx,
        stop_rx,
    ));

    let mut forward = PortForward {
        local_port,
        target: target.clone(),
        stop: Some(stop_tx),
        task: Some(task),
    };

    match tokio::time::timeout(ready_timeout, ready_rx).await {
        Ok(Ok(())) => {
            info!("Port-forward ready: 127.0.0.1:{} -> {}", local_port, target);
            Ok(forward)
        }
        Ok(Err(_)) => {
            forward.signal_stop();
            Err(TunnelError::Closed(target))
        }
        Err(_) => {
            forward.signal_stop();
            Err(TunnelError::Timeout {
                namespace: pod.namespace,
                pod: pod.name,
                port: remote_port,
                timeout: ready_timeout,
            })
        }
    }
}

async fn run_forward(
    cluster: Arc<dyn ClusterClient>,
    pod: PodRef,
    remote_port: u16,
    listener: TcpListener,
    ready_tx: oneshot::Sender<()>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    // Wait until the pod port answers at least once
    loop {
        tokio::select! {
            _ = &mut stop_rx => return,
            probe = cluster.connect_port(&pod, remote_port) => match probe {
                Ok(_) => break,
                Err(e) => {
                    debug!("Port {} of {}/{} not ready yet: {}", remote_port, pod.namespace, pod.name, e);
                }
            }
        }
        tokio::select! {
            _ = &mut stop_rx => return,
            _ = tokio::time::sleep(PROBE_INTERVAL) => {}
        }
    }

    if ready_tx.send(()).is_err() {
        // Caller gave up waiting
        return;
    }

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            accepted = listener.accept() => {
                let (mut inbound, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Failed to accept forwarded connection: {}", e);
                        continue;
                    }
                };
                let cluster = cluster.clone();
                let pod = pod.clone();
                tokio::spawn(async move {
                    let mut upstream = match cluster.connect_port(&pod, remote_port).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            warn!("Failed to open stream to {}/{}:{} for {}: {}", pod.namespace, pod.name, remote_port, peer, e);
                            return;
                        }
                    };
                    match tokio::io::copy_bidirectional(&mut inbound, &mut upstream).await {
                        Ok((sent, received)) => debug!("Forwarded connection from {} closed ({} bytes out, {} bytes in)", peer, sent, received),
                        Err(e) => debug!("Forwarded connection from {} failed: {}", peer, e),
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cluster::InMemoryCluster;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn pod() -> PodRef {
        PodRef {
            namespace: "ns".to_string(),
            name: "sshd-0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_times_out_when_port_never_answers() {
        let cluster = Arc::new(InMemoryCluster::new("https://cluster-a"));
        let result = port_forward(cluster, pod(), 22, Duration::from_millis(200)).await;
        assert!(matches!(result, Err(TunnelError::Timeout { port: 22, .. })));
    }

    #[tokio::test]
    async fn test_forwards_bytes_to_pod_port() {
        let cluster = Arc::new(InMemoryCluster::new("https://cluster-a"));
        cluster.serve_echo(&pod(), 22);

        let forward = port_forward(cluster, pod(), 22, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(forward.target(), "ns/sshd-0:22");

        let mut conn = TcpStream::connect(("127.0.0.1", forward.local_port()))
            .await
            .unwrap();
        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        let port = forward.local_port();
        forward.stop().await;
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }
}
