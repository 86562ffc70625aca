// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deterministic instance identity derivation.
//!
//! An instance is keyed by `(challenge_id, source_id)`. The identity is used
//! both as the on-disk record key and as the `identity` configuration value
//! handed to the scenario, so it has to be stable across processes and safe
//! to embed in resource names (lowercase hex, fixed length).

use sha2::{Digest, Sha256};

/// Separator between the challenge and source components.
///
/// Without it, `("ab", "c")` and `("a", "bc")` would hash identically.
const SEPARATOR: &str = "|";

/// Length of the derived identity in hex characters.
const IDENTITY_LEN: usize = 32;

/// Derive the identity of the instance of `challenge_id` for `source_id`.
pub fn compute_identity(challenge_id: &str, source_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge_id.as_bytes());
    hasher.update(SEPARATOR.as_bytes());
    hasher.update(source_id.as_bytes());
    let digest = hasher.finalize();

    let mut out = hex::encode(digest);
    out.truncate(IDENTITY_LEN);
    out
}
