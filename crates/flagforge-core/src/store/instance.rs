// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance records and engine state blobs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FsStore, Result, StoreError};

/// A live deployment of a challenge for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Deterministic identity derived from `(challenge_id, source_id)`.
    pub identity: String,
    /// Owning challenge.
    pub challenge_id: String,
    /// Requesting source.
    pub source_id: String,
    /// Creation instant.
    pub since: DateTime<Utc>,
    /// Latest renewal instant.
    pub last_renew: DateTime<Utc>,
    /// Scheduled expiry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    /// Connection information produced by the scenario.
    pub connection_info: String,
    /// Flags produced by the scenario.
    #[serde(default)]
    pub flags: Vec<String>,
    /// Per-instance configuration overrides, merged over the challenge's.
    #[serde(default)]
    pub additional: BTreeMap<String, String>,
}

impl Instance {
    /// Whether the instance is past its expiry at `now`.
    pub fn expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.until, Some(until) if until <= now)
    }
}

impl FsStore {
    /// Persist an instance record.
    pub async fn write_instance(&self, instance: &Instance) -> Result<()> {
        let path = self
            .instance_dir(&instance.challenge_id, &instance.identity)?
            .join("info.json");
        self.write_json(&path, instance).await
    }

    /// Load an instance record.
    pub async fn read_instance(&self, challenge_id: &str, identity: &str) -> Result<Instance> {
        let path = self.instance_dir(challenge_id, identity)?.join("info.json");
        self.read_json(&path, &format!("instance {challenge_id}/{identity}"))
            .await
    }

    /// Whether an instance record exists.
    pub async fn instance_exists(&self, challenge_id: &str, identity: &str) -> Result<bool> {
        match self.read_instance(challenge_id, identity).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// List identities of all instances recorded under a challenge.
    pub async fn list_instances(&self, challenge_id: &str) -> Result<Vec<String>> {
        let dir = self.challenge_dir(challenge_id)?.join("instance");
        self.list_dirs(&dir).await
    }

    /// Remove an instance directory recursively (record, state, working copy).
    pub async fn delete_instance_dir(&self, challenge_id: &str, identity: &str) -> Result<()> {
        let dir = self.instance_dir(challenge_id, identity)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the engine's serialized deployment for an instance.
    ///
    /// Kept out of `info.json` so the record stays small and inspectable.
    pub async fn write_state(
        &self,
        challenge_id: &str,
        identity: &str,
        state: &[u8],
    ) -> Result<()> {
        let dir = self.state_dir(challenge_id, identity)?;
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join("deployment.json");
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, state).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Load the engine's serialized deployment for an instance.
    pub async fn read_state(&self, challenge_id: &str, identity: &str) -> Result<Vec<u8>> {
        let path = self.state_dir(challenge_id, identity)?.join("deployment.json");
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound(
                format!("state {challenge_id}/{identity}"),
            )),
            Err(e) => Err(e.into()),
        }
    }
}
