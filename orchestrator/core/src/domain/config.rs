// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Migration Configuration Types
//!
//! Defines the configuration schema for pv-migrate, including:
//! - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
//! - Helper images used for transfer jobs
//! - Helm chart reference for sshd / rsync agents
//! - Tunnel and job timing
//! - Logging defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "pv-migrate/v1";
pub const KIND: &str = "MigrationConfig";

/// Top-level Kubernetes-style configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfigManifest {
    /// API version (must be "pv-migrate/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "MigrationConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: MigrationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Configuration handed to the engine and every strategy at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[serde(default)]
    pub images: ImageConfig,

    #[serde(default)]
    pub helm: HelmConfig,

    #[serde(default)]
    pub tunnel: TunnelConfig,

    #[serde(default)]
    pub job: JobConfig,

    /// Prefix of every resource name an attempt creates
    #[serde(default = "default_resource_prefix")]
    pub resource_prefix: String,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Image running rsync in transfer jobs
    #[serde(default = "default_rsync_image")]
    pub rsync: String,

    /// Image running sshd in helper pods
    #[serde(default = "default_sshd_image")]
    pub sshd: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelmConfig {
    /// Chart reference: local path, `repo/chart` or `oci://` URL
    #[serde(default = "default_chart")]
    pub chart: String,

    /// Optional chart version constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// `--timeout` for install/uninstall (seconds)
    #[serde(default = "default_helm_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// How long a port-forward may take to become ready
    #[serde(default = "default_port_forward_timeout")]
    pub port_forward_timeout_seconds: u64,

    /// Port the reverse tunnel listens on inside the source sshd pod
    #[serde(default = "default_reverse_tunnel_port")]
    pub reverse_tunnel_port: u16,

    /// sshd port in helper pods
    #[serde(default = "default_sshd_port")]
    pub sshd_port: u16,

    /// How long to wait for helper pods to come up
    #[serde(default = "default_pod_ready_timeout")]
    pub pod_ready_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Seconds a finished job lingers before the cluster collects it
    #[serde(default = "default_job_ttl")]
    pub ttl_seconds_after_finished: i32,

    /// In-pod rsync retries before the job fails
    #[serde(default = "default_rsync_retries")]
    pub rsync_retries: u32,

    /// Pause between in-pod rsync retries
    #[serde(default = "default_rsync_retry_delay")]
    pub rsync_retry_delay_seconds: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("fancy" or "json")
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_resource_prefix() -> String {
    "pv-migrate".to_string()
}

fn default_rsync_image() -> String {
    "docker.io/utkuozdemir/pv-migrate-rsync:alpine-3-20210522".to_string()
}

fn default_sshd_image() -> String {
    "docker.io/utkuozdemir/pv-migrate-sshd:alpine-3-20210522".to_string()
}

fn default_chart() -> String {
    "pv-migrate/pv-migrate".to_string()
}

fn default_helm_timeout() -> u64 {
    60
}

fn default_port_forward_timeout() -> u64 {
    30
}

fn default_reverse_tunnel_port() -> u16 {
    50000
}

fn default_sshd_port() -> u16 {
    22
}

fn default_pod_ready_timeout() -> u64 {
    120
}

fn default_job_ttl() -> i32 {
    600
}

fn default_rsync_retries() -> u32 {
    10
}

fn default_rsync_retry_delay() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "fancy".to_string()
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            rsync: default_rsync_image(),
            sshd: default_sshd_image(),
        }
    }
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            chart: default_chart(),
            version: None,
            timeout_seconds: default_helm_timeout(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            port_forward_timeout_seconds: default_port_forward_timeout(),
            reverse_tunnel_port: default_reverse_tunnel_port(),
            sshd_port: default_sshd_port(),
            pod_ready_timeout_seconds: default_pod_ready_timeout(),
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            ttl_seconds_after_finished: default_job_ttl(),
            rsync_retries: default_rsync_retries(),
            rsync_retry_delay_seconds: default_rsync_retry_delay(),
            service_account: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            images: ImageConfig::default(),
            helm: HelmConfig::default(),
            tunnel: TunnelConfig::default(),
            job: JobConfig::default(),
            resource_prefix: default_resource_prefix(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TunnelConfig {
    pub fn port_forward_timeout(&self) -> Duration {
        Duration::from_secs(self.port_forward_timeout_seconds)
    }

    pub fn pod_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.pod_ready_timeout_seconds)
    }
}

impl Default for MigrationConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "default".to_string(),
                version: Some("1.0.0".to_string()),
            },
            spec: MigrationConfig::default(),
        }
    }
}

impl MigrationConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. PV_MIGRATE_CONFIG_PATH environment variable
    /// 2. ./pv-migrate.yaml (working directory)
    /// 3. ~/.pv-migrate/config.yaml (user home)
    /// 4. /etc/pv-migrate/config.yaml (system, Unix)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("PV_MIGRATE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./pv-migrate.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".pv-migrate").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        {
            let system_config = PathBuf::from("/etc/pv-migrate/config.yaml");
            if system_config.exists() {
                return Some(system_config);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist
        if let Some(path) = cli_path {
            tracing::debug!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(config_path) => {
                tracing::debug!("Loading configuration from discovered path: {:?}", config_path);
                Self::from_yaml_file(config_path)?
            }
            None => {
                tracing::debug!("No configuration file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides looked up by variable name.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(image) = lookup("PV_MIGRATE_RSYNC_IMAGE") {
            if !image.trim().is_empty() {
                tracing::debug!("Environment override: PV_MIGRATE_RSYNC_IMAGE={}", image);
                self.spec.images.rsync = image;
            }
        }

        if let Some(chart) = lookup("PV_MIGRATE_HELM_CHART") {
            if !chart.trim().is_empty() {
                tracing::debug!("Environment override: PV_MIGRATE_HELM_CHART={}", chart);
                self.spec.helm.chart = chart;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;
        if spec.images.rsync.is_empty() || spec.images.sshd.is_empty() {
            anyhow::bail!("spec.images.rsync and spec.images.sshd cannot be empty");
        }

        if spec.helm.chart.is_empty() {
            anyhow::bail!("spec.helm.chart cannot be empty");
        }

        if spec.tunnel.port_forward_timeout_seconds == 0 {
            anyhow::bail!("spec.tunnel.port_forward_timeout_seconds must be greater than zero");
        }

        if spec.tunnel.reverse_tunnel_port == 0 || spec.tunnel.sshd_port == 0 {
            anyhow::bail!("spec.tunnel ports must be non-zero");
        }

        // Resource names end up as DNS labels
        let prefix = &spec.resource_prefix;
        let valid_prefix = !prefix.is_empty()
            && prefix.len() <= 40
            && prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            && !prefix.starts_with('-');
        if !valid_prefix {
            anyhow::bail!(
                "spec.resource_prefix '{}' must be a lowercase DNS label of at most 40 characters",
                prefix
            );
        }

        match spec.logging.format.as_str() {
            "fancy" | "json" => {}
            other => anyhow::bail!("Invalid spec.logging.format '{}'. Must be fancy or json", other),
        }

        Ok(())
    }
}
