// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Strategy Engine
//!
//! Owns the registered strategies and drives a task through them: pick the
//! candidates, then try one attempt per candidate until one succeeds. Every
//! attempt is cleaned up before the next one starts.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::attempt::Attempt;
use crate::application::resolver::{resolve, ResolveError};
use crate::application::strategy::{Strategy, StrategyError};
use crate::domain::cluster::ClusterConnector;
use crate::domain::config::MigrationConfig;
use crate::domain::request::MigrationRequest;
use crate::domain::task::Task;

#[derive(Debug)]
pub struct StrategyFailure {
    pub strategy: String,
    pub error: StrategyError,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.error)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No strategies registered")]
    NoStrategies,
    #[error("Strategy {0} is registered more than once")]
    DuplicateStrategy(String),
    #[error("Unknown strategies: {} (available: {})", .requested.join(", "), .available.join(", "))]
    UnknownStrategies {
        requested: Vec<String>,
        available: Vec<String>,
    },
    #[error("None of the strategies can handle this migration")]
    NoApplicableStrategy,
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("Migration cancelled")]
    Cancelled,
    #[error("All strategies failed: {}", join_failures(.0))]
    AllFailed(Vec<StrategyFailure>),
}

fn join_failures(failures: &[StrategyFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result of a successful migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    /// Strategy that completed the transfer
    pub strategy: String,
    pub attempt_id: String,
    /// Attempts made, including the successful one
    pub attempts: usize,
}

pub struct StrategyEngine {
    strategies: Vec<Arc<dyn Strategy>>,
    config: Arc<MigrationConfig>,
}

impl StrategyEngine {
    pub fn new(
        strategies: Vec<Arc<dyn Strategy>>,
        config: Arc<MigrationConfig>,
    ) -> Result<Self, EngineError> {
        if strategies.is_empty() {
            return Err(EngineError::NoStrategies);
        }
        let mut seen = HashSet::new();
        for strategy in &strategies {
            if !seen.insert(strategy.name().to_string()) {
                return Err(EngineError::DuplicateStrategy(strategy.name().to_string()));
            }
        }
        Ok(Self { strategies, config })
    }

    /// Registered strategies in registration order.
    pub fn strategies(&self) -> &[Arc<dyn Strategy>] {
        &self.strategies
    }

    /// Strategies to try for `task`, in order.
    ///
    /// Explicitly requested names keep the requested order; otherwise all
    /// registered strategies are ordered by priority. Either way only those
    /// that can handle the task are returned.
    pub fn determine_strategies(
        &self,
        task: &Task,
        requested: &[String],
    ) -> Result<Vec<Arc<dyn Strategy>>, EngineError> {
        let candidates: Vec<Arc<dyn Strategy>> = if requested.is_empty() {
            let mut all = self.strategies.clone();
            all.sort_by_key(|s| s.priority());
            all
        } else {
            let unknown: Vec<String> = requested
                .iter()
                .filter(|name| !self.strategies.iter().any(|s| s.name() == name.as_str()))
                .cloned()
                .collect();
            if !unknown.is_empty() {
                return Err(EngineError::UnknownStrategies {
                    requested: unknown,
                    available: self.strategies.iter().map(|s| s.name().to_string()).collect(),
                });
            }
            requested
                .iter()
                .filter_map(|name| self.strategies.iter().find(|s| s.name() == name.as_str()))
                .cloned()
                .collect()
        };

        Ok(candidates
            .into_iter()
            .filter(|s| {
                let ok = s.can_do(task);
                if !ok {
                    debug!("Strategy {} cannot handle this migration, skipping", s.name());
                }
                ok
            })
            .collect())
    }

    /// Tries the candidate strategies in order until one succeeds.
    pub async fn run(
        &self,
        task: Arc<Task>,
        cancel: CancellationToken,
    ) -> Result<MigrationOutcome, EngineError> {
        let candidates = self.determine_strategies(&task, &task.request().strategies)?;
        if candidates.is_empty() {
            return Err(EngineError::NoApplicableStrategy);
        }

        let names: Vec<&str> = candidates.iter().map(|s| s.name()).collect();
        info!("Will attempt {} strategies: {}", names.len(), names.join(", "));

        let mut failures = Vec::new();
        for strategy in candidates {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }

            let attempt = Attempt::new(
                task.clone(),
                strategy.name(),
                &self.config.resource_prefix,
                cancel.child_token(),
            );
            info!(attempt = %attempt.id(), "Attempting strategy {}", strategy.name());

            let result = tokio::select! {
                result = strategy.run(&attempt) => Some(result),
                _ = cancel.cancelled() => None,
            };

            if let Err(e) = strategy.cleanup(&attempt).await {
                warn!(attempt = %attempt.id(), "Cleanup of strategy {} failed: {}", strategy.name(), e);
            }

            match result {
                Some(Ok(())) => {
                    info!(
                        attempt = %attempt.id(),
                        "Migration succeeded with strategy {} after {}s",
                        strategy.name(),
                        (chrono::Utc::now() - attempt.started_at()).num_seconds()
                    );
                    return Ok(MigrationOutcome {
                        strategy: strategy.name().to_string(),
                        attempt_id: attempt.id().to_string(),
                        attempts: failures.len() + 1,
                    });
                }
                None | Some(Err(StrategyError::Cancelled)) => {
                    warn!(attempt = %attempt.id(), "Migration cancelled during strategy {}", strategy.name());
                    return Err(EngineError::Cancelled);
                }
                Some(Err(e)) => {
                    warn!(attempt = %attempt.id(), "Strategy {} failed: {}", strategy.name(), e);
                    failures.push(StrategyFailure {
                        strategy: strategy.name().to_string(),
                        error: e,
                    });
                }
            }
        }

        error!("All {} strategies failed", failures.len());
        Err(EngineError::AllFailed(failures))
    }

    /// Resolves `request` and runs it.
    pub async fn migrate(
        &self,
        connector: &dyn ClusterConnector,
        request: MigrationRequest,
        cancel: CancellationToken,
    ) -> Result<MigrationOutcome, EngineError> {
        let task = resolve(connector, request).await?;
        self.run(Arc::new(task), cancel).await
    }
}
