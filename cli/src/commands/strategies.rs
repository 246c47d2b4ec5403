// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Strategies command

use anyhow::Result;
use colored::Colorize;
use std::sync::Arc;

use pv_migrate_core::application::strategy::{default_strategies, StrategyContext};
use pv_migrate_core::domain::config::MigrationConfigManifest;
use pv_migrate_core::infrastructure::HelmDeployer;

const DESCRIPTIONS: [(&str, &str); 3] = [
    ("mnt2", "one job mounting both claims (same namespace, compatible nodes)"),
    ("svc", "rsync job pulls from an sshd pod over the cluster network (same cluster)"),
    ("local", "both sshd pods relayed through this machine (any two clusters)"),
];

/// `(name, priority)` of every built-in strategy in default order.
pub fn list(manifest: &MigrationConfigManifest) -> Vec<(String, u32)> {
    let config = Arc::new(manifest.spec.clone());
    let deployer = Arc::new(HelmDeployer::new(&config.helm));
    let mut strategies: Vec<(String, u32)> = default_strategies(StrategyContext::new(config, deployer))
        .iter()
        .map(|s| (s.name().to_string(), s.priority()))
        .collect();
    strategies.sort_by_key(|(_, priority)| *priority);
    strategies
}

pub fn execute(manifest: MigrationConfigManifest) -> Result<()> {
    println!("{}", "Strategies (tried in this order by default):".bold());
    for (name, priority) in list(&manifest) {
        let description = DESCRIPTIONS
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, d)| *d)
            .unwrap_or("");
        println!("  {:<6} {:>5}  {}", name.bold(), priority, description.dimmed());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let names: Vec<String> = list(&MigrationConfigManifest::default())
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["mnt2", "svc", "local"]);
    }
}
