// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Capability Resolver
//!
//! Turns a [`MigrationRequest`] into a [`Task`]: connects to the cluster of
//! each side, reads the claim and works out which node (if any) currently
//! pins it. Only read-only cluster queries happen here.

use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::cluster::{ClusterConnector, ClusterError};
use crate::domain::endpoint::VolumeEndpoint;
use crate::domain::request::{MigrationRequest, PvcInfo};
use crate::domain::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Destination,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => f.write_str("source"),
            Side::Destination => f.write_str("destination"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Cannot connect to the {side} cluster: {source}")]
    Connect {
        side: Side,
        #[source]
        source: ClusterError,
    },
    #[error("The {side} claim {namespace}/{name} does not exist")]
    ClaimNotFound {
        side: Side,
        namespace: String,
        name: String,
    },
    #[error("The {side} claim {namespace}/{name} is mounted on more than one node ({}), cannot decide where to run", .nodes.join(", "))]
    AmbiguousMount {
        side: Side,
        namespace: String,
        name: String,
        nodes: Vec<String>,
    },
    #[error("The {side} claim {namespace}/{name} is mounted by pod {pod}. Stop the pod or pass --ignore-mounted")]
    Mounted {
        side: Side,
        namespace: String,
        name: String,
        pod: String,
    },
    #[error("Failed to inspect the {side} claim: {source}")]
    Cluster {
        side: Side,
        #[source]
        source: ClusterError,
    },
}

/// Resolves both sides of `request` into a task.
pub async fn resolve(
    connector: &dyn ClusterConnector,
    request: MigrationRequest,
) -> Result<Task, ResolveError> {
    let ignore_mounted = request.options.ignore_mounted;
    let source = resolve_endpoint(connector, &request.source, Side::Source, ignore_mounted).await?;
    let dest = resolve_endpoint(connector, &request.dest, Side::Destination, ignore_mounted).await?;

    info!(
        "Resolved {}/{} -> {}/{}",
        source.namespace(),
        source.claim_name(),
        dest.namespace(),
        dest.claim_name()
    );
    Ok(Task::new(request, source, dest))
}

async fn resolve_endpoint(
    connector: &dyn ClusterConnector,
    pvc: &PvcInfo,
    side: Side,
    ignore_mounted: bool,
) -> Result<VolumeEndpoint, ResolveError> {
    let (cluster, default_namespace) = connector
        .connect(pvc)
        .await
        .map_err(|source| ResolveError::Connect { side, source })?;
    let namespace = pvc
        .namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(default_namespace);

    let claim = cluster
        .get_claim(&namespace, &pvc.name)
        .await
        .map_err(|e| match e {
            ClusterError::NotFound { .. } => ResolveError::ClaimNotFound {
                side,
                namespace: namespace.clone(),
                name: pvc.name.clone(),
            },
            source => ResolveError::Cluster { side, source },
        })?;

    let mounts = cluster
        .list_pods_mounting_claim(&namespace, &pvc.name)
        .await
        .map_err(|source| ResolveError::Cluster { side, source })?;

    let nodes: BTreeSet<String> = mounts
        .iter()
        .filter(|m| !m.node.is_empty())
        .map(|m| m.node.clone())
        .collect();
    if nodes.len() > 1 {
        return Err(ResolveError::AmbiguousMount {
            side,
            namespace,
            name: pvc.name.clone(),
            nodes: nodes.into_iter().collect(),
        });
    }

    if let Some(mount) = mounts.first() {
        if !ignore_mounted {
            return Err(ResolveError::Mounted {
                side,
                namespace,
                name: pvc.name.clone(),
                pod: mount.pod.clone(),
            });
        }
        debug!("{} claim {}/{} is mounted by {}, continuing", side, namespace, pvc.name, mount.pod);
    }

    let mounted_node = nodes.into_iter().next();
    Ok(
        VolumeEndpoint::new(claim, pvc.path.clone(), mounted_node, cluster)
            .with_kubeconfig(pvc.kubeconfig_path.clone(), pvc.context.clone()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::endpoint::AccessMode;
    use crate::domain::request::MigrationOptions;
    use crate::infrastructure::cluster::{InMemoryCluster, InMemoryConnector};
    use std::sync::Arc;

    fn request(ignore_mounted: bool) -> MigrationRequest {
        MigrationRequest::new(
            PvcInfo::new("old").with_namespace("ns1"),
            PvcInfo::new("new"),
        )
        .with_options(MigrationOptions {
            ignore_mounted,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_mounted_claim_yields_node() {
        let cluster = Arc::new(
            InMemoryCluster::new("https://a")
                .with_claim("ns1", "old", &[AccessMode::ReadOnlyMany])
                .with_claim("default", "new", &[AccessMode::ReadWriteOnce])
                .with_pod("ns1", "web-0", "node-1", "old"),
        );
        let connector = InMemoryConnector::new().with_cluster(None, cluster, "default");

        let task = resolve(&connector, request(true)).await.unwrap();
        assert_eq!(task.source().mounted_node(), Some("node-1"));
        assert!(task.source().supports_rox());
        assert_eq!(task.dest().namespace(), "default");
        assert_eq!(task.dest().mounted_node(), None);
        assert!(task.same_cluster());
    }

    #[tokio::test]
    async fn test_mounted_claim_requires_ignore_mounted() {
        let cluster = Arc::new(
            InMemoryCluster::new("https://a")
                .with_claim("ns1", "old", &[AccessMode::ReadWriteOnce])
                .with_claim("default", "new", &[AccessMode::ReadWriteOnce])
                .with_pod("ns1", "web-0", "node-1", "old"),
        );
        let connector = InMemoryConnector::new().with_cluster(None, cluster, "default");

        let err = resolve(&connector, request(false)).await.unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Mounted { side: Side::Source, ref pod, .. } if pod == "web-0"
        ));
    }

    #[tokio::test]
    async fn test_two_nodes_is_ambiguous() {
        let cluster = Arc::new(
            InMemoryCluster::new("https://a")
                .with_claim("ns1", "old", &[AccessMode::ReadWriteMany])
                .with_claim("default", "new", &[AccessMode::ReadWriteOnce])
                .with_pod("ns1", "web-0", "node-1", "old")
                .with_pod("ns1", "web-1", "node-2", "old"),
        );
        let connector = InMemoryConnector::new().with_cluster(None, cluster, "default");

        let err = resolve(&connector, request(true)).await.unwrap_err();
        match err {
            ResolveError::AmbiguousMount { nodes, .. } => {
                assert_eq!(nodes, vec!["node-1".to_string(), "node-2".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_claim() {
        let cluster = Arc::new(
            InMemoryCluster::new("https://a").with_claim("ns1", "old", &[AccessMode::ReadWriteOnce]),
        );
        let connector = InMemoryConnector::new().with_cluster(None, cluster, "default");

        let err = resolve(&connector, request(false)).await.unwrap_err();
        assert!(matches!(
            err,
            ResolveError::ClaimNotFound { side: Side::Destination, .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_context() {
        let connector = InMemoryConnector::new();
        let mut req = request(false);
        req.source = req.source.with_context("nope");
        let err = resolve(&connector, req).await.unwrap_err();
        assert!(matches!(err, ResolveError::Connect { side: Side::Source, .. }));
    }
}
