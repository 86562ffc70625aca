// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scenario project descriptor.
//!
//! Every scenario working directory must carry a `Pulumi.yaml` (or
//! `Pulumi.yml`) with at least a `name` field. The name takes part in the
//! engine's stack naming, so a scenario without one is unusable.

use std::path::Path;

use serde::Deserialize;

use crate::error::{ScenarioError, ScenarioResult};

/// Parsed project descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    /// Project name, used in stack naming.
    pub name: String,
    /// Language runtime declared by the scenario.
    #[serde(default)]
    pub runtime: Option<serde_yaml::Value>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

impl Project {
    /// Load the project descriptor from a scenario working directory.
    ///
    /// Tries `Pulumi.yaml` first, then `Pulumi.yml`.
    pub fn load(dir: &Path) -> ScenarioResult<Self> {
        let bytes = read_descriptor(dir)?;
        let project: Project =
            serde_yaml::from_slice(&bytes).map_err(|e| ScenarioError::InvalidDescriptor {
                dir: dir.display().to_string(),
                reason: e.to_string(),
            })?;
        if project.name.is_empty() {
            return Err(ScenarioError::InvalidDescriptor {
                dir: dir.display().to_string(),
                reason: "empty project name".to_string(),
            });
        }
        Ok(project)
    }
}

fn read_descriptor(dir: &Path) -> ScenarioResult<Vec<u8>> {
    for candidate in ["Pulumi.yaml", "Pulumi.yml"] {
        match std::fs::read(dir.join(candidate)) {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(ScenarioError::InvalidDescriptor {
        dir: dir.display().to_string(),
        reason: "no Pulumi.yaml or Pulumi.yml".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_yaml() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("Pulumi.yaml"),
            "name: my-chall\nruntime: go\ndescription: a challenge\n",
        )
        .unwrap();

        let project = Project::load(tmp.path()).unwrap();
        assert_eq!(project.name, "my-chall");
        assert_eq!(project.description.as_deref(), Some("a challenge"));
    }

    #[test]
    fn test_load_yml_fallback() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("Pulumi.yml"), "name: fallback\n").unwrap();

        let project = Project::load(tmp.path()).unwrap();
        assert_eq!(project.name, "fallback");
    }

    #[test]
    fn test_load_prefers_yaml_over_yml() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("Pulumi.yaml"), "name: primary\n").unwrap();
        std::fs::write(tmp.path().join("Pulumi.yml"), "name: secondary\n").unwrap();

        let project = Project::load(tmp.path()).unwrap();
        assert_eq!(project.name, "primary");
    }

    #[test]
    fn test_load_missing_descriptor() {
        let tmp = TempDir::new().unwrap();
        let result = Project::load(tmp.path());
        assert!(matches!(
            result,
            Err(ScenarioError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_load_invalid_yaml() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("Pulumi.yaml"), ": not yaml [").unwrap();

        let result = Project::load(tmp.path());
        assert!(matches!(
            result,
            Err(ScenarioError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_load_empty_name() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("Pulumi.yaml"), "name: \"\"\n").unwrap();

        let result = Project::load(tmp.path());
        assert!(matches!(
            result,
            Err(ScenarioError::InvalidDescriptor { .. })
        ));
    }
}
