// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Strategy Attempt
//!
//! Runtime state of one strategy executing against one task. The short
//! random id namespaces every external name the attempt creates, so a
//! leftover of a failed attempt never collides with the next one.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::application::cleanup::CleanupRegistry;
use crate::domain::task::Task;

pub const ATTEMPT_ID_LENGTH: usize = 5;
const ATTEMPT_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Label keys put on every helper resource.
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Random `[a-z0-9]{5}` identifier.
pub fn generate_attempt_id() -> String {
    let mut rng = rand::rng();
    (0..ATTEMPT_ID_LENGTH)
        .map(|_| ATTEMPT_ID_ALPHABET[rng.random_range(0..ATTEMPT_ID_ALPHABET.len())] as char)
        .collect()
}

pub struct Attempt {
    id: String,
    strategy: String,
    release_name: String,
    task: Arc<Task>,
    cleanup: Arc<CleanupRegistry>,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
}

impl Attempt {
    pub fn new(
        task: Arc<Task>,
        strategy: impl Into<String>,
        resource_prefix: &str,
        cancel: CancellationToken,
    ) -> Self {
        let id = generate_attempt_id();
        Self {
            release_name: format!("{}-{}", resource_prefix, id),
            cleanup: Arc::new(CleanupRegistry::new(id.clone())),
            id,
            strategy: strategy.into(),
            task,
            cancel,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub fn cleanup(&self) -> &Arc<CleanupRegistry> {
        &self.cleanup
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// `<prefix>-<id>`, the base of every name this attempt creates
    pub fn release_name(&self) -> &str {
        &self.release_name
    }

    /// `<prefix>-<id>-<suffix>`
    pub fn resource_name(&self, suffix: &str) -> String {
        format!("{}-{}", self.release_name, suffix)
    }

    /// Labels identifying a helper resource of this attempt.
    pub fn labels(&self, component: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (COMPONENT_LABEL.to_string(), component.to_string()),
            (INSTANCE_LABEL.to_string(), self.release_name.clone()),
            (MANAGED_BY_LABEL.to_string(), "pv-migrate".to_string()),
        ])
    }

    /// Selector matching the pods of `component` in `release`.
    pub fn release_selector(component: &str, release: &str) -> String {
        format!("{}={},{}={}", COMPONENT_LABEL, component, INSTANCE_LABEL, release)
    }
}

impl std::fmt::Debug for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attempt")
            .field("id", &self.id)
            .field("strategy", &self.strategy)
            .field("release_name", &self.release_name)
            .field("started_at", &self.started_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_id_shape() {
        for _ in 0..100 {
            let id = generate_attempt_id();
            assert_eq!(id.len(), ATTEMPT_ID_LENGTH);
            assert!(id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_release_selector() {
        assert_eq!(
            Attempt::release_selector("sshd", "pv-migrate-abcde-src"),
            "app.kubernetes.io/component=sshd,app.kubernetes.io/instance=pv-migrate-abcde-src"
        );
    }
}
