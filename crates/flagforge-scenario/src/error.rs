// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Errors for scenario resolution and caching.

use thiserror::Error;

/// Errors from scenario resolution, download, and caching.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScenarioError {
    /// The scenario reference cannot be parsed or points nowhere.
    #[error("Invalid scenario reference: {0}")]
    InvalidReference(String),

    /// The registry rejected our credentials.
    #[error("Registry authentication failed: {0}")]
    Unauthenticated(String),

    /// The registry could not be reached.
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    /// The artifact is not a usable scenario (bad manifest, bad layer, bad
    /// archive, digest mismatch).
    #[error("Malformed scenario artifact: {0}")]
    InvalidArtifact(String),

    /// The working directory has no usable project descriptor.
    #[error("Missing or invalid project descriptor in {dir}: {reason}")]
    InvalidDescriptor {
        /// Directory that was inspected.
        dir: String,
        /// What was wrong.
        reason: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for scenario operations.
pub type ScenarioResult<T> = std::result::Result<T, ScenarioError>;
