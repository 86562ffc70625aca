// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Infrastructure engine adapter.
//!
//! A narrow contract over an imperative IaC engine that runs a scenario in a
//! *stack* and produces outputs. The orchestration layers only ever talk to
//! [`Engine`], so the concrete engine (the Pulumi CLI in production, the mock
//! in tests) can be swapped without touching them.

pub mod mock;
pub mod pulumi;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors from engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The operation exceeded the configured engine timeout.
    ///
    /// Typical cause: the scenario waits on a cluster resource that never
    /// materializes, e.g. an unallocated LoadBalancer IP.
    #[error("Engine operation {op} timed out")]
    Timeout {
        /// Operation that expired.
        op: &'static str,
        /// Last stderr captured before the child was killed, if any.
        stderr: String,
    },

    /// The engine ran but the scenario program failed.
    #[error("Scenario failed during {op}: {stderr}")]
    Scenario {
        /// Operation that failed.
        op: &'static str,
        /// Truncated engine stderr.
        stderr: String,
    },

    /// The scenario completed but its outputs violate the output contract.
    #[error("Invalid scenario output: {0}")]
    InvalidOutput(String),

    /// I/O failure talking to the engine.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other engine failure.
    #[error("Engine error: {0}")]
    Other(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Handle to an opened stack.
///
/// Opaque to callers: created by [`Engine::load`] and passed back into every
/// other operation.
#[derive(Debug, Clone)]
pub struct StackHandle {
    /// Scenario working directory.
    pub workdir: PathBuf,
    /// Project name from the scenario descriptor.
    pub project: String,
    /// Instance identity; one stack exists per identity.
    pub identity: String,
}

impl StackHandle {
    /// Fully qualified stack name.
    pub fn stack_name(&self) -> String {
        format!("organization/{}/{}", self.project, self.identity)
    }
}

/// Configuration handed to the scenario through the engine.
///
/// The scenario reads these keys by name: `identity`, `challenge_id`,
/// `image_pull_secrets` (JSON list), `additional` (JSON map).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackConfig {
    /// Instance identity.
    pub identity: String,
    /// Owning challenge.
    pub challenge_id: String,
    /// Image pull secret names.
    pub image_pull_secrets: Vec<String>,
    /// Merged additional configuration.
    pub additional: BTreeMap<String, String>,
}

impl StackConfig {
    /// Build the stack configuration for an instance, merging challenge- and
    /// instance-level `additional`. The instance wins on key collision.
    pub fn merged(
        identity: &str,
        challenge_id: &str,
        image_pull_secrets: &[String],
        challenge_additional: &BTreeMap<String, String>,
        instance_additional: &BTreeMap<String, String>,
    ) -> Self {
        let mut additional = challenge_additional.clone();
        for (key, value) in instance_additional {
            additional.insert(key.clone(), value.clone());
        }
        Self {
            identity: identity.to_string(),
            challenge_id: challenge_id.to_string(),
            image_pull_secrets: image_pull_secrets.to_vec(),
            additional,
        }
    }
}

/// Named outputs of a successful `up`.
#[derive(Debug, Clone, Default)]
pub struct EngineOutputs {
    /// Raw output map as produced by the scenario.
    pub outputs: Map<String, Value>,
}

/// Contract over the infrastructure engine.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Open (or create) the stack for `identity` in `workdir`.
    async fn load(&self, workdir: &Path, project: &str, identity: &str) -> Result<StackHandle>;

    /// Set the scenario configuration on the stack.
    async fn set_config(&self, stack: &StackHandle, config: &StackConfig) -> Result<()>;

    /// Dry-run: validate that the scenario compiles and plans without
    /// mutating infrastructure.
    async fn preview(&self, stack: &StackHandle) -> Result<()>;

    /// Create or converge real resources; returns the scenario outputs.
    async fn up(&self, stack: &StackHandle) -> Result<EngineOutputs>;

    /// Destroy all resources. The stack remains usable for a later `up`.
    async fn down(&self, stack: &StackHandle) -> Result<()>;

    /// Serialize the engine's deployment for storage.
    async fn export(&self, stack: &StackHandle) -> Result<Vec<u8>>;

    /// Restore a previously exported deployment into the stack.
    async fn import(&self, stack: &StackHandle, state: &[u8]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_name() {
        let stack = StackHandle {
            workdir: PathBuf::from("/tmp/x"),
            project: "my-chall".to_string(),
            identity: "abc123".to_string(),
        };
        assert_eq!(stack.stack_name(), "organization/my-chall/abc123");
    }

    #[test]
    fn test_stack_config_merge_instance_wins() {
        let challenge = BTreeMap::from([
            ("shared".to_string(), "challenge".to_string()),
            ("only_challenge".to_string(), "1".to_string()),
        ]);
        let instance = BTreeMap::from([
            ("shared".to_string(), "instance".to_string()),
            ("only_instance".to_string(), "2".to_string()),
        ]);

        let config = StackConfig::merged("id", "c1", &[], &challenge, &instance);

        assert_eq!(config.additional["shared"], "instance");
        assert_eq!(config.additional["only_challenge"], "1");
        assert_eq!(config.additional["only_instance"], "2");
    }

    #[test]
    fn test_stack_config_merge_empty_instance() {
        let challenge = BTreeMap::from([("k".to_string(), "v".to_string())]);
        let config = StackConfig::merged("id", "c1", &[], &challenge, &BTreeMap::new());
        assert_eq!(config.additional["k"], "v");
    }
}
