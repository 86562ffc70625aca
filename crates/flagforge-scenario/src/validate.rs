// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registration-time scenario validation.
//!
//! Runs the scenario through a dry-run with a throwaway identity before the
//! challenge record is accepted, so a broken scenario is rejected at
//! registration instead of at the first instance request.

use std::collections::BTreeMap;
use std::path::Path;

use rand::Rng;
use tracing::info;

use crate::engine::{Engine, Result, StackConfig};

/// Validate a scenario working directory against `engine`.
///
/// Generates a random identity, configures the stack the same way a real
/// instance would be configured, and previews it. Scenario-attributable
/// failures surface as [`EngineError::Scenario`](crate::EngineError::Scenario).
pub async fn validate(
    engine: &dyn Engine,
    workdir: &Path,
    project: &str,
    challenge_id: &str,
    image_pull_secrets: &[String],
    additional: &BTreeMap<String, String>,
) -> Result<()> {
    let identity = random_identity();
    let stack = engine.load(workdir, project, &identity).await?;
    let config = StackConfig::merged(
        &identity,
        challenge_id,
        image_pull_secrets,
        additional,
        &BTreeMap::new(),
    );
    engine.set_config(&stack, &config).await?;
    engine.preview(&stack).await?;

    info!(
        challenge_id = challenge_id,
        identity = %identity,
        "Scenario validated"
    );
    Ok(())
}

fn random_identity() -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..12)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect();
    format!("validate-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use crate::engine::mock::MockEngine;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_validate_ok() {
        let engine = MockEngine::new();
        validate(
            &engine,
            &PathBuf::from("/tmp/x"),
            "proj",
            "c1",
            &[],
            &BTreeMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(engine.preview_calls(), 1);
        // Validation only previews.
        assert_eq!(engine.up_calls(), 0);
    }

    #[tokio::test]
    async fn test_validate_failing_scenario() {
        let engine = MockEngine::failing();
        let result = validate(
            &engine,
            &PathBuf::from("/tmp/x"),
            "proj",
            "c1",
            &[],
            &BTreeMap::new(),
        )
        .await;
        assert!(matches!(result, Err(EngineError::Scenario { .. })));
    }

    #[test]
    fn test_random_identity_shape() {
        let a = random_identity();
        let b = random_identity();
        assert!(a.starts_with("validate-"));
        assert_eq!(a.len(), "validate-".len() + 12);
        assert_ne!(a, b);
    }
}
