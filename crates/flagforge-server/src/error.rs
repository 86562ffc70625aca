// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the flagforge server.

use thiserror::Error;

/// Server errors. Mapped to gRPC status codes in `services::status`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Request validation failed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The challenge does not exist (lookup operations).
    #[error("Challenge not found: {0}")]
    ChallengeNotFound(String),

    /// An instance operation named a challenge that is not registered.
    #[error("Unknown challenge: {0}")]
    UnknownChallenge(String),

    /// The instance does not exist.
    #[error("Instance not found: {challenge_id}/{source_id}")]
    InstanceNotFound {
        /// Owning challenge.
        challenge_id: String,
        /// Requesting source.
        source_id: String,
    },

    /// A challenge with this id is already registered.
    #[error("Challenge already exists: {0}")]
    ChallengeExists(String),

    /// An instance already exists for this `(challenge_id, source_id)`.
    #[error("Instance already exists: {challenge_id}/{source_id}")]
    InstanceExists {
        /// Owning challenge.
        challenge_id: String,
        /// Requesting source.
        source_id: String,
    },

    /// The challenge reached its configured instance limit.
    #[error("Challenge {challenge_id} reached its instance limit ({max})")]
    InstanceLimit {
        /// Owning challenge.
        challenge_id: String,
        /// Configured maximum.
        max: u32,
    },

    /// Renewal requires the challenge to define a timeout.
    #[error("Challenge {0} defines no timeout, instances cannot be renewed")]
    RenewWithoutTimeout(String),

    /// Some instances failed to re-deploy during a challenge update.
    /// Already-updated instances are not rolled back; retry is safe.
    #[error("{} of {total} instances failed to update: {identities:?}", identities.len())]
    PartialUpdate {
        /// Total instances in the fan-out.
        total: usize,
        /// Identities that failed.
        identities: Vec<String>,
    },

    /// Some instances failed to delete during a challenge delete.
    /// The challenge record is kept; retry is safe.
    #[error("{} of {total} instances failed to delete: {identities:?}", identities.len())]
    PartialDelete {
        /// Total instances in the cascade.
        total: usize,
        /// Identities that failed.
        identities: Vec<String>,
    },

    /// Store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] flagforge_core::store::StoreError),

    /// Lock operation failed.
    #[error("Lock error: {0}")]
    Lock(#[from] flagforge_core::lock::LockError),

    /// Scenario resolution failed.
    #[error("Scenario error: {0}")]
    Scenario(#[from] flagforge_scenario::ScenarioError),

    /// Engine operation failed.
    #[error("Engine error: {0}")]
    Engine(#[from] flagforge_scenario::EngineError),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, Error>;
