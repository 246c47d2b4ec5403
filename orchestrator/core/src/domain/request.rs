// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Migration Request
//!
//! The operator-supplied description of a migration: which claim to read,
//! which claim to write, how rsync should behave and which strategies may
//! be tried. Nothing in here has touched a cluster yet.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Location of one persistent volume claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvcInfo {
    /// Kubeconfig file to use (None = `KUBECONFIG` / `~/.kube/config`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig_path: Option<PathBuf>,

    /// Context inside the kubeconfig (None = current context)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Namespace of the claim (None = namespace of the context)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Claim name
    pub name: String,

    /// Path inside the volume to migrate
    #[serde(default = "default_path")]
    pub path: String,
}

impl PvcInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: default_path(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig_path = Some(path.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

/// SSH key algorithms accepted for the ephemeral transport key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa,
    #[default]
    Ed25519,
}

impl KeyAlgorithm {
    pub const ALL: [KeyAlgorithm; 2] = [KeyAlgorithm::Rsa, KeyAlgorithm::Ed25519];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyAlgorithm::Rsa => "rsa",
            KeyAlgorithm::Ed25519 => "ed25519",
        }
    }

    /// Default location of the private key inside helper pods.
    pub fn private_key_mount_path(&self) -> String {
        format!("/tmp/id_{}", self.as_str())
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unsupported SSH key algorithm '{0}'. Valid values are: rsa, ed25519")]
pub struct UnknownKeyAlgorithm(pub String);

impl FromStr for KeyAlgorithm {
    type Err = UnknownKeyAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rsa" => Ok(KeyAlgorithm::Rsa),
            "ed25519" => Ok(KeyAlgorithm::Ed25519),
            other => Err(UnknownKeyAlgorithm(other.to_string())),
        }
    }
}

/// Extra values handed verbatim to every helm install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmOverrides {
    /// `--values` files or URLs
    #[serde(default)]
    pub values_files: Vec<String>,
    /// `--set key=value`
    #[serde(default)]
    pub set: Vec<String>,
    /// `--set-string key=value`
    #[serde(default)]
    pub set_string: Vec<String>,
    /// `--set-file key=path`
    #[serde(default)]
    pub set_file: Vec<String>,
}

impl HelmOverrides {
    pub fn is_empty(&self) -> bool {
        self.values_files.is_empty()
            && self.set.is_empty()
            && self.set_string.is_empty()
            && self.set_file.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOptions {
    /// Pass `--delete` to rsync
    #[serde(default)]
    pub delete_extraneous_files: bool,

    /// Proceed even if a claim is mounted by a running pod
    #[serde(default)]
    pub ignore_mounted: bool,

    /// Pass `--no-o --no-g` to rsync
    #[serde(default)]
    pub no_chown: bool,

    /// Mount the source claim read-only in helper pods
    #[serde(default = "default_true")]
    pub source_mount_read_only: bool,

    #[serde(default)]
    pub no_progress_bar: bool,

    #[serde(default)]
    pub key_algorithm: KeyAlgorithm,

    /// Replaces the in-cluster rsync target host (svc strategy only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_host_override: Option<String>,

    #[serde(default)]
    pub helm: HelmOverrides,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            delete_extraneous_files: false,
            ignore_mounted: false,
            no_chown: false,
            source_mount_read_only: true,
            no_progress_bar: false,
            key_algorithm: KeyAlgorithm::default(),
            dest_host_override: None,
            helm: HelmOverrides::default(),
        }
    }
}

/// A complete migration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRequest {
    pub source: PvcInfo,
    pub dest: PvcInfo,
    #[serde(default)]
    pub options: MigrationOptions,
    /// Strategy names in the order to try them; empty = engine default order
    #[serde(default)]
    pub strategies: Vec<String>,
}

impl MigrationRequest {
    pub fn new(source: PvcInfo, dest: PvcInfo) -> Self {
        Self {
            source,
            dest,
            options: MigrationOptions::default(),
            strategies: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: MigrationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_strategies<I, S>(mut self, strategies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.strategies = strategies
            .into_iter()
            .map(Into::into)
            .filter(|s: &String| !s.trim().is_empty())
            .collect();
        self
    }
}

fn default_path() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_algorithm_parse() {
        assert_eq!("ed25519".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::Ed25519);
        assert_eq!("RSA".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::Rsa);
        let err = "dsa".parse::<KeyAlgorithm>().unwrap_err();
        assert!(err.to_string().contains("dsa"));
    }

    #[test]
    fn test_key_mount_path() {
        assert_eq!(KeyAlgorithm::Ed25519.private_key_mount_path(), "/tmp/id_ed25519");
    }

    #[test]
    fn test_default_options() {
        let options = MigrationOptions::default();
        assert!(options.source_mount_read_only);
        assert!(!options.ignore_mounted);
        assert!(!options.delete_extraneous_files);
        assert_eq!(options.key_algorithm, KeyAlgorithm::Ed25519);
    }

    #[test]
    fn test_blank_strategy_names_are_dropped() {
        let request = MigrationRequest::new(PvcInfo::new("a"), PvcInfo::new("b"))
            .with_strategies(["mnt2", " ", ""]);
        assert_eq!(request.strategies, vec!["mnt2".to_string()]);
    }

    #[test]
    fn test_pvc_defaults_to_root_path() {
        let pvc = PvcInfo::new("data");
        assert_eq!(pvc.path, "/");
        assert!(pvc.namespace.is_none());
    }
}
