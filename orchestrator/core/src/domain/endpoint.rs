// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume Endpoint
//!
//! One resolved side of a migration: the claim, the cluster it lives in, the
//! access modes it supports and the node it is pinned to (if any pod is
//! currently mounting it).

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::domain::cluster::{ClaimInfo, ClusterClient};

/// Kubernetes persistent volume access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
    ReadWriteOncePod,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadWriteOnce => "ReadWriteOnce",
            AccessMode::ReadOnlyMany => "ReadOnlyMany",
            AccessMode::ReadWriteMany => "ReadWriteMany",
            AccessMode::ReadWriteOncePod => "ReadWriteOncePod",
        }
    }
}

impl FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ReadWriteOnce" => Ok(AccessMode::ReadWriteOnce),
            "ReadOnlyMany" => Ok(AccessMode::ReadOnlyMany),
            "ReadWriteMany" => Ok(AccessMode::ReadWriteMany),
            "ReadWriteOncePod" => Ok(AccessMode::ReadWriteOncePod),
            other => Err(format!("unknown access mode '{}'", other)),
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct VolumeEndpoint {
    claim: ClaimInfo,
    path: String,
    mounted_node: Option<String>,
    cluster: Arc<dyn ClusterClient>,
    /// Source of the cluster handle, used by the deployer to address the same cluster
    kubeconfig_path: Option<std::path::PathBuf>,
    context: Option<String>,
}

impl VolumeEndpoint {
    pub fn new(
        claim: ClaimInfo,
        path: impl Into<String>,
        mounted_node: Option<String>,
        cluster: Arc<dyn ClusterClient>,
    ) -> Self {
        Self {
            claim,
            path: path.into(),
            mounted_node: mounted_node.filter(|n| !n.is_empty()),
            cluster,
            kubeconfig_path: None,
            context: None,
        }
    }

    pub fn with_kubeconfig(
        mut self,
        kubeconfig_path: Option<std::path::PathBuf>,
        context: Option<String>,
    ) -> Self {
        self.kubeconfig_path = kubeconfig_path;
        self.context = context;
        self
    }

    pub fn claim(&self) -> &ClaimInfo {
        &self.claim
    }

    pub fn namespace(&self) -> &str {
        &self.claim.namespace
    }

    pub fn claim_name(&self) -> &str {
        &self.claim.name
    }

    /// Path inside the volume to migrate
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mounted_node(&self) -> Option<&str> {
        self.mounted_node.as_deref()
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterClient> {
        &self.cluster
    }

    pub fn kubeconfig_path(&self) -> Option<&std::path::Path> {
        self.kubeconfig_path.as_deref()
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn supports_rwo(&self) -> bool {
        self.has_mode(AccessMode::ReadWriteOnce) || self.has_mode(AccessMode::ReadWriteOncePod)
    }

    pub fn supports_rox(&self) -> bool {
        self.has_mode(AccessMode::ReadOnlyMany)
    }

    pub fn supports_rwx(&self) -> bool {
        self.has_mode(AccessMode::ReadWriteMany)
    }

    /// Exclusive claims can only be mounted on the node already using them.
    pub fn is_exclusive(&self) -> bool {
        !self.supports_rox() && !self.supports_rwx()
    }

    /// Both handles point at the same control plane.
    pub fn same_cluster(&self, other: &VolumeEndpoint) -> bool {
        self.cluster.host() == other.cluster.host()
    }

    /// Helm `affinity` value pinning helper pods next to the mounting pod.
    pub fn affinity_values(&self) -> serde_json::Value {
        match &self.mounted_node {
            None => json!({}),
            Some(node) => json!({
                "nodeAffinity": {
                    "requiredDuringSchedulingIgnoredDuringExecution": {
                        "nodeSelectorTerms": [{
                            "matchExpressions": [{
                                "key": "kubernetes.io/hostname",
                                "operator": "In",
                                "values": [node],
                            }]
                        }]
                    }
                }
            }),
        }
    }

    fn has_mode(&self, mode: AccessMode) -> bool {
        self.claim.access_modes.contains(&mode)
    }
}

impl fmt::Debug for VolumeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeEndpoint")
            .field("claim", &self.claim)
            .field("path", &self.path)
            .field("mounted_node", &self.mounted_node)
            .field("host", &self.cluster.host())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cluster::InMemoryCluster;

    fn endpoint(modes: Vec<AccessMode>, node: Option<&str>) -> VolumeEndpoint {
        let claim = ClaimInfo {
            namespace: "ns".to_string(),
            name: "data".to_string(),
            access_modes: modes,
        };
        VolumeEndpoint::new(
            claim,
            "/",
            node.map(str::to_string),
            Arc::new(InMemoryCluster::new("https://cluster-a")),
        )
    }

    #[test]
    fn test_access_mode_flags() {
        let ep = endpoint(vec![AccessMode::ReadWriteOnce, AccessMode::ReadWriteMany], None);
        assert!(ep.supports_rwo());
        assert!(!ep.supports_rox());
        assert!(ep.supports_rwx());
        assert!(!ep.is_exclusive());

        let ep = endpoint(vec![AccessMode::ReadWriteOncePod], None);
        assert!(ep.supports_rwo());
        assert!(ep.is_exclusive());
    }

    #[test]
    fn test_empty_node_is_unmounted() {
        let ep = endpoint(vec![AccessMode::ReadWriteOnce], Some(""));
        assert_eq!(ep.mounted_node(), None);
        assert_eq!(ep.affinity_values(), json!({}));
    }

    #[test]
    fn test_affinity_pins_mounted_node() {
        let ep = endpoint(vec![AccessMode::ReadWriteOnce], Some("node-1"));
        let values = ep.affinity_values();
        let expr = &values["nodeAffinity"]["requiredDuringSchedulingIgnoredDuringExecution"]
            ["nodeSelectorTerms"][0]["matchExpressions"][0];
        assert_eq!(expr["key"], "kubernetes.io/hostname");
        assert_eq!(expr["values"][0], "node-1");
    }

    #[test]
    fn test_access_mode_parse() {
        assert_eq!("ReadOnlyMany".parse::<AccessMode>(), Ok(AccessMode::ReadOnlyMany));
        assert!("Sometimes".parse::<AccessMode>().is_err());
    }
}
