// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod attempt;
pub mod cleanup;
pub mod engine;
pub mod resolver;
pub mod strategy;

// Re-export the pieces callers wire together
pub use attempt::Attempt;
pub use cleanup::{CleanupError, CleanupGuard, CleanupRegistry, TrackedResource};
pub use engine::{EngineError, MigrationOutcome, StrategyEngine, StrategyFailure};
pub use resolver::{resolve, ResolveError, Side};
pub use strategy::{default_strategies, Strategy, StrategyContext, StrategyError, DEFAULT_STRATEGIES};
