// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use pv_migrate_core::domain::config::MigrationConfigManifest;

const EXAMPLE_CONFIG: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./pv-migrate.yaml)
        #[arg(short, long, default_value = "./pv-migrate.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = MigrationConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. PV_MIGRATE_CONFIG_PATH: {}",
            std::env::var("PV_MIGRATE_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./pv-migrate.yaml");
        println!("  4. ~/.pv-migrate/config.yaml");
        println!("  5. /etc/pv-migrate/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{} {}", "Current configuration:".bold(), config.metadata.name);
    println!();

    println!("{}", "Images:".bold());
    println!("  rsync: {}", spec.images.rsync);
    println!("  sshd: {}", spec.images.sshd);
    println!();

    println!("{}", "Helm:".bold());
    println!("  Chart: {}", spec.helm.chart);
    println!(
        "  Version: {}",
        spec.helm.version.as_deref().unwrap_or("(latest)")
    );
    println!("  Timeout: {}s", spec.helm.timeout_seconds);
    println!();

    println!("{}", "Tunnels:".bold());
    println!(
        "  Port-forward timeout: {}s",
        spec.tunnel.port_forward_timeout_seconds
    );
    println!("  Pod ready timeout: {}s", spec.tunnel.pod_ready_timeout_seconds);
    println!("  Reverse tunnel port: {}", spec.tunnel.reverse_tunnel_port);
    println!("  sshd port: {}", spec.tunnel.sshd_port);
    println!();

    println!("{}", "Jobs:".bold());
    println!("  TTL after finished: {}s", spec.job.ttl_seconds_after_finished);
    println!(
        "  rsync retries: {} ({}s apart)",
        spec.job.rsync_retries, spec.job.rsync_retry_delay_seconds
    );
    if let Some(account) = &spec.job.service_account {
        println!("  Service account: {}", account);
    }
    println!();

    println!("Resource prefix: {}", spec.resource_prefix);
    println!("Logging: {} ({})", spec.logging.level, spec.logging.format);

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = MigrationConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    if with_examples {
        std::fs::write(&output, EXAMPLE_CONFIG)
            .with_context(|| format!("Failed to write config to {:?}", output))?;
    } else {
        MigrationConfigManifest::default()
            .to_yaml_file(&output)
            .with_context(|| format!("Failed to write config to {:?}", output))?;
    }

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
