// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Migrate command
//!
//! Builds a [`MigrationRequest`] from the command line, wires the kube and
//! helm backed capabilities into the strategy engine and runs it until it
//! succeeds, every strategy fails or the operator interrupts.

use anyhow::{Context, Result};
use clap::{ArgAction, Args};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pv_migrate_core::application::engine::{EngineError, StrategyEngine};
use pv_migrate_core::application::strategy::{default_strategies, StrategyContext};
use pv_migrate_core::domain::config::MigrationConfigManifest;
use pv_migrate_core::domain::request::{
    HelmOverrides, KeyAlgorithm, MigrationOptions, MigrationRequest, PvcInfo,
};
use pv_migrate_core::infrastructure::{HelmDeployer, KubeConnector};

#[derive(Debug, Clone, Args)]
pub struct MigrateArgs {
    /// Source persistent volume claim
    #[arg(value_name = "SOURCE")]
    pub source: String,

    /// Destination persistent volume claim
    #[arg(value_name = "DEST")]
    pub dest: String,

    /// Path of the kubeconfig file of the source claim
    #[arg(short = 'k', long, value_name = "FILE")]
    pub source_kubeconfig: Option<PathBuf>,

    /// Context in the kubeconfig file of the source claim
    #[arg(short = 'c', long)]
    pub source_context: Option<String>,

    /// Namespace of the source claim
    #[arg(short = 'n', long)]
    pub source_namespace: Option<String>,

    /// Filesystem path to migrate in the source claim
    #[arg(short = 'p', long, default_value = "/")]
    pub source_path: String,

    /// Path of the kubeconfig file of the destination claim
    #[arg(short = 'K', long, value_name = "FILE")]
    pub dest_kubeconfig: Option<PathBuf>,

    /// Context in the kubeconfig file of the destination claim
    #[arg(short = 'C', long)]
    pub dest_context: Option<String>,

    /// Namespace of the destination claim
    #[arg(short = 'N', long)]
    pub dest_namespace: Option<String>,

    /// Filesystem path to migrate in the destination claim
    #[arg(short = 'P', long, default_value = "/")]
    pub dest_path: String,

    /// Delete extraneous files on the destination (rsync `--delete`)
    #[arg(short = 'd', long)]
    pub dest_delete_extraneous_files: bool,

    /// Do not fail if the source or destination claim is mounted
    #[arg(short = 'i', long)]
    pub ignore_mounted: bool,

    /// Omit chown on rsync
    #[arg(short = 'o', long)]
    pub no_chown: bool,

    /// Do not display a progress bar
    #[arg(short = 'b', long)]
    pub no_progress_bar: bool,

    /// Mount the source claim read-only
    #[arg(short = 'R', long, default_value_t = true, action = ArgAction::Set)]
    pub source_mount_read_only: bool,

    /// Comma-separated strategies to try, in order (default: all, by priority)
    #[arg(short = 's', long, value_delimiter = ',')]
    pub strategies: Vec<String>,

    /// SSH key algorithm (rsa, ed25519)
    #[arg(short = 'a', long = "ssh-key-algorithm", default_value = "ed25519")]
    pub key_algorithm: KeyAlgorithm,

    /// Override of the rsync target host for the svc strategy
    #[arg(short = 'H', long)]
    pub dest_host_override: Option<String>,

    /// Additional helm values file or URL (repeatable)
    #[arg(short = 'f', long = "helm-values", value_delimiter = ',')]
    pub helm_values: Vec<String>,

    /// Additional helm values, key=value (repeatable)
    #[arg(long, value_delimiter = ',')]
    pub helm_set: Vec<String>,

    /// Additional helm string values, key=value (repeatable)
    #[arg(long, value_delimiter = ',')]
    pub helm_set_string: Vec<String>,

    /// Additional helm values read from files, key=path (repeatable)
    #[arg(long, value_delimiter = ',')]
    pub helm_set_file: Vec<String>,
}

impl MigrateArgs {
    pub fn into_request(self) -> MigrationRequest {
        let source = PvcInfo {
            kubeconfig_path: self.source_kubeconfig,
            context: self.source_context,
            namespace: self.source_namespace,
            name: self.source,
            path: self.source_path,
        };
        let dest = PvcInfo {
            kubeconfig_path: self.dest_kubeconfig,
            context: self.dest_context,
            namespace: self.dest_namespace,
            name: self.dest,
            path: self.dest_path,
        };
        let options = MigrationOptions {
            delete_extraneous_files: self.dest_delete_extraneous_files,
            ignore_mounted: self.ignore_mounted,
            no_chown: self.no_chown,
            source_mount_read_only: self.source_mount_read_only,
            no_progress_bar: self.no_progress_bar,
            key_algorithm: self.key_algorithm,
            dest_host_override: self.dest_host_override.filter(|h| !h.is_empty()),
            helm: HelmOverrides {
                values_files: self.helm_values,
                set: self.helm_set,
                set_string: self.helm_set_string,
                set_file: self.helm_set_file,
            },
        };

        MigrationRequest::new(source, dest)
            .with_options(options)
            .with_strategies(self.strategies)
    }
}

pub async fn execute(args: MigrateArgs, manifest: MigrationConfigManifest) -> Result<()> {
    manifest
        .validate()
        .context("Configuration validation failed")?;
    let config = Arc::new(manifest.spec);
    let request = args.into_request();

    let deployer = match HelmDeployer::new(&config.helm)
        .with_overrides(request.options.helm.clone())
        .ensure_available()
    {
        Ok(deployer) => deployer,
        Err(e) => {
            warn!("{}; only strategies without helper releases can succeed", e);
            HelmDeployer::new(&config.helm).with_overrides(request.options.helm.clone())
        }
    };

    let context = StrategyContext::new(config.clone(), Arc::new(deployer));
    let engine = StrategyEngine::new(default_strategies(context), config)
        .context("Failed to set up strategies")?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    info!("Starting migration");
    if request.options.delete_extraneous_files {
        info!("Extraneous files will be deleted from the destination");
    }

    match engine.migrate(&KubeConnector, request, cancel).await {
        Ok(outcome) => {
            println!(
                "{}",
                format!(
                    "✓ Migration succeeded with strategy {} (attempt {})",
                    outcome.strategy, outcome.attempt_id
                )
                .green()
            );
            Ok(())
        }
        Err(EngineError::Cancelled) => {
            eprintln!("{}", "Migration interrupted, helper resources were released".yellow());
            Err(EngineError::Cancelled.into())
        }
        Err(e) => {
            eprintln!("{}", format!("✗ {}", e).red());
            Err(anyhow::Error::new(e).context("Migration failed"))
        }
    }
}

/// Cancels `token` on Ctrl-C or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    warn!("Interrupt received, cleaning up");
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: MigrateArgs,
    }

    fn parse(args: &[&str]) -> MigrateArgs {
        let mut argv = vec!["pv-migrate"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().args
    }

    #[test]
    fn test_defaults() {
        let request = parse(&["old", "new"]).into_request();
        assert_eq!(request.source.name, "old");
        assert_eq!(request.dest.name, "new");
        assert_eq!(request.source.path, "/");
        assert!(request.source.namespace.is_none());
        assert!(request.options.source_mount_read_only);
        assert!(!request.options.ignore_mounted);
        assert_eq!(request.options.key_algorithm, KeyAlgorithm::Ed25519);
        assert!(request.strategies.is_empty());
        assert!(request.options.helm.is_empty());
    }

    #[test]
    fn test_short_flags() {
        let request = parse(&[
            "-n", "src-ns", "-N", "dest-ns", "-c", "a", "-C", "b", "-p", "/data", "-d", "-i",
            "-o", "-b", "-R", "false", "-s", "svc,local", "-a", "rsa", "-H", "10.0.0.1",
            "-f", "values.yaml", "old", "new",
        ])
        .into_request();

        assert_eq!(request.source.namespace.as_deref(), Some("src-ns"));
        assert_eq!(request.dest.namespace.as_deref(), Some("dest-ns"));
        assert_eq!(request.source.context.as_deref(), Some("a"));
        assert_eq!(request.dest.context.as_deref(), Some("b"));
        assert_eq!(request.source.path, "/data");
        assert!(request.options.delete_extraneous_files);
        assert!(request.options.ignore_mounted);
        assert!(request.options.no_chown);
        assert!(request.options.no_progress_bar);
        assert!(!request.options.source_mount_read_only);
        assert_eq!(request.strategies, vec!["svc", "local"]);
        assert_eq!(request.options.key_algorithm, KeyAlgorithm::Rsa);
        assert_eq!(request.options.dest_host_override.as_deref(), Some("10.0.0.1"));
        assert_eq!(request.options.helm.values_files, vec!["values.yaml"]);
    }

    #[test]
    fn test_helm_set_flags() {
        let request = parse(&[
            "--helm-set",
            "a=1,b=2",
            "--helm-set-string",
            "c=3",
            "--helm-set-file",
            "d=/tmp/d",
            "old",
            "new",
        ])
        .into_request();
        assert_eq!(request.options.helm.set, vec!["a=1", "b=2"]);
        assert_eq!(request.options.helm.set_string, vec!["c=3"]);
        assert_eq!(request.options.helm.set_file, vec!["d=/tmp/d"]);
    }

    #[test]
    fn test_unknown_key_algorithm_is_rejected() {
        let result = TestCli::try_parse_from(["pv-migrate", "-a", "dsa", "old", "new"]);
        assert!(result.is_err());
    }
}
