// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Helm Deployer
//!
//! Installs the helper chart by shelling out to the `helm` binary. The values
//! tree built by a strategy is written to a temporary YAML file and passed
//! with `--values`, followed by the operator's own overrides so they win.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use crate::domain::config::HelmConfig;
use crate::domain::deployer::{DeployError, Deployer};
use crate::domain::endpoint::VolumeEndpoint;
use crate::domain::request::HelmOverrides;

pub const HELM_BINARY: &str = "helm";

pub struct HelmDeployer {
    binary: PathBuf,
    chart: String,
    version: Option<String>,
    timeout: Duration,
    overrides: HelmOverrides,
}

impl HelmDeployer {
    pub fn new(config: &HelmConfig) -> Self {
        Self {
            binary: PathBuf::from(HELM_BINARY),
            chart: config.chart.clone(),
            version: config.version.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            overrides: HelmOverrides::default(),
        }
    }

    /// Operator supplied `--values` / `--set*` applied to every install.
    pub fn with_overrides(mut self, overrides: HelmOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Resolves `helm` on `PATH`.
    pub fn ensure_available(mut self) -> Result<Self, DeployError> {
        self.binary = which::which(HELM_BINARY)
            .map_err(|e| DeployError::BinaryNotFound(format!("{}: {}", HELM_BINARY, e)))?;
        Ok(self)
    }

    fn target_args(&self, target: &VolumeEndpoint) -> Vec<String> {
        let mut args = vec!["--namespace".to_string(), target.namespace().to_string()];
        if let Some(path) = target.kubeconfig_path() {
            args.push("--kubeconfig".to_string());
            args.push(path.display().to_string());
        }
        if let Some(context) = target.context() {
            args.push("--kube-context".to_string());
            args.push(context.to_string());
        }
        args
    }

    fn install_args(&self, release: &str, target: &VolumeEndpoint, values_file: &Path) -> Vec<String> {
        let mut args = vec![
            "install".to_string(),
            release.to_string(),
            self.chart.clone(),
        ];
        args.extend(self.target_args(target));
        if let Some(version) = &self.version {
            args.push("--version".to_string());
            args.push(version.clone());
        }
        args.push("--values".to_string());
        args.push(values_file.display().to_string());

        let overrides = [
            ("--values", &self.overrides.values_files),
            ("--set", &self.overrides.set),
            ("--set-string", &self.overrides.set_string),
            ("--set-file", &self.overrides.set_file),
        ];
        for (flag, entries) in overrides {
            for entry in entries {
                args.push(flag.to_string());
                args.push(entry.clone());
            }
        }

        args.push("--wait".to_string());
        args.push("--timeout".to_string());
        args.push(format!("{}s", self.timeout.as_secs()));
        args
    }

    fn uninstall_args(&self, release: &str, target: &VolumeEndpoint) -> Vec<String> {
        let mut args = vec!["uninstall".to_string(), release.to_string()];
        args.extend(self.target_args(target));
        args.push("--wait".to_string());
        args.push("--timeout".to_string());
        args.push(format!("{}s", self.timeout.as_secs()));
        args
    }

    async fn run(&self, args: &[String]) -> Result<std::process::Output, DeployError> {
        debug!("Running {} {}", self.binary.display(), args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }
}

#[async_trait]
impl Deployer for HelmDeployer {
    async fn install(
        &self,
        release: &str,
        target: &VolumeEndpoint,
        values: serde_json::Value,
    ) -> Result<(), DeployError> {
        let yaml = serde_yaml::to_string(&values).map_err(|e| DeployError::Values(e.to_string()))?;
        let mut values_file = tempfile::Builder::new()
            .prefix("pv-migrate-values-")
            .suffix(".yaml")
            .tempfile()?;
        values_file.write_all(yaml.as_bytes())?;
        values_file.flush()?;

        info!("Installing release {} into {}", release, target.namespace());
        let output = self
            .run(&self.install_args(release, target, values_file.path()))
            .await?;
        if !output.status.success() {
            return Err(DeployError::InstallFailed {
                release: release.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn uninstall(&self, release: &str, target: &VolumeEndpoint) -> Result<(), DeployError> {
        let output = self.run(&self.uninstall_args(release, target)).await?;
        if output.status.success() {
            info!("Uninstalled release {}", release);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("not found") {
            debug!("Release {} already gone", release);
            return Ok(());
        }
        Err(DeployError::UninstallFailed {
            release: release.to_string(),
            reason: stderr.trim().to_string(),
        })
    }
}
