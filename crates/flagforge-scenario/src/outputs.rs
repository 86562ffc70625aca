// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scenario output contract.
//!
//! A scenario must produce `connection_info` (string) and its flags as
//! either `flag` (single string) or `flags` (list of strings). Both flag
//! outputs are still accepted; when both appear, the single flag comes
//! first.

use serde_json::{Map, Value};
use tracing::warn;

use crate::engine::{EngineError, EngineOutputs};

/// Parsed scenario outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioOutputs {
    /// Connection information shown to the player.
    pub connection_info: String,
    /// Flags accepted for this instance.
    pub flags: Vec<String>,
}

impl ScenarioOutputs {
    /// Parse and validate engine outputs against the contract.
    pub fn parse(outputs: &EngineOutputs) -> Result<Self, EngineError> {
        Self::parse_map(&outputs.outputs)
    }

    fn parse_map(outputs: &Map<String, Value>) -> Result<Self, EngineError> {
        let connection_info = outputs
            .get("connection_info")
            .ok_or_else(|| {
                EngineError::InvalidOutput("connection_info output not found".to_string())
            })?
            .as_str()
            .ok_or_else(|| {
                EngineError::InvalidOutput("connection_info must be a string".to_string())
            })?
            .to_string();

        let mut flags = Vec::new();
        if let Some(flag) = outputs.get("flag") {
            // Still accepted for older scenarios; `flags` is the output to use.
            warn!("scenario exports the deprecated \"flag\" output, use \"flags\" instead");
            let flag = flag.as_str().ok_or_else(|| {
                EngineError::InvalidOutput("flag must be a string".to_string())
            })?;
            flags.push(flag.to_string());
        }
        if let Some(list) = outputs.get("flags") {
            let list = list.as_array().ok_or_else(|| {
                EngineError::InvalidOutput("flags must be an array of strings".to_string())
            })?;
            for entry in list {
                let entry = entry.as_str().ok_or_else(|| {
                    EngineError::InvalidOutput(format!(
                        "invalid flag {entry}, should be a string"
                    ))
                })?;
                flags.push(entry.to_string());
            }
        }

        Ok(Self {
            connection_info,
            flags,
        })
    }
}
