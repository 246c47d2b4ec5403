// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # pv-migrate
//!
//! Migrates the contents of one Kubernetes persistent volume claim into
//! another, in the same namespace, across namespaces or across clusters.
//!
//! ## Commands
//!
//! - `pv-migrate migrate <SOURCE> <DEST>` - Run a migration
//! - `pv-migrate strategies` - List the transfer strategies
//! - `pv-migrate config show|validate|generate` - Configuration management
//! - `pv-migrate completions <SHELL>` - Shell completion script

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use std::path::PathBuf;

use pv_migrate::commands::{self, ConfigCommand, MigrateArgs};
use pv_migrate::logging::{init_logging, LogFormat};
use pv_migrate_core::domain::config::MigrationConfigManifest;

/// Migrate data between Kubernetes persistent volume claims
#[derive(Parser)]
#[command(name = "pv-migrate")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        long,
        global = true,
        env = "PV_MIGRATE_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "PV_MIGRATE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format
    #[arg(long, global = true, value_enum, env = "PV_MIGRATE_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate data from the source claim to the destination claim
    #[command(name = "migrate", visible_alias = "m")]
    Migrate(Box<MigrateArgs>),

    /// List the available strategies in default order
    #[command(name = "strategies")]
    Strategies,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Generate a shell completion script
    #[command(name = "completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Needs neither configuration nor logging
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut command = Cli::command();
        return commands::completions::write(*shell, &mut command, &mut std::io::stdout());
    }

    let mut manifest = MigrationConfigManifest::load_or_default(cli.config.clone())
        .context("Failed to load configuration")?;
    if let Some(level) = &cli.log_level {
        manifest.spec.logging.level = level.clone();
    }
    if let Some(format) = cli.log_format {
        manifest.spec.logging.format = format.as_str().to_string();
    }

    init_logging(&manifest.spec.logging)?;

    match cli.command {
        Some(Commands::Migrate(args)) => commands::migrate::execute(*args, manifest).await,
        Some(Commands::Strategies) => commands::strategies::execute(manifest),
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        Some(Commands::Completions { .. }) => Ok(()),
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}
