// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Challenge records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{FsStore, Result, StoreError};

/// A registered challenge: scenario reference plus deployment policy.
///
/// Unknown fields are tolerated on read so records written by newer versions
/// stay loadable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    /// Unique challenge identifier.
    pub id: String,
    /// Scenario reference: an OCI reference or a local directory.
    pub scenario: String,
    /// Content digest of the scenario at registration time.
    pub hash: String,
    /// Default expiry instant inherited by new instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    /// Default instance lifetime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Advisory lower bound on instance count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    /// Upper bound on instance count, enforced at create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
    /// Extra key/value configuration forwarded to the scenario.
    #[serde(default)]
    pub additional: BTreeMap<String, String>,
    /// Image pull secret names forwarded to the scenario.
    #[serde(default)]
    pub image_pull_secrets: Vec<String>,
}

impl FsStore {
    /// Persist a challenge record.
    pub async fn write_challenge(&self, challenge: &Challenge) -> Result<()> {
        let path = self.challenge_dir(&challenge.id)?.join("info.json");
        self.write_json(&path, challenge).await
    }

    /// Load a challenge record.
    pub async fn read_challenge(&self, challenge_id: &str) -> Result<Challenge> {
        let path = self.challenge_dir(challenge_id)?.join("info.json");
        self.read_json(&path, &format!("challenge {challenge_id}"))
            .await
    }

    /// Whether a challenge record exists.
    pub async fn challenge_exists(&self, challenge_id: &str) -> Result<bool> {
        match self.read_challenge(challenge_id).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// List ids of all challenges with a directory under the store root.
    pub async fn list_challenges(&self) -> Result<Vec<String>> {
        self.list_dirs(&self.root().join("chall")).await
    }

    /// Remove a challenge directory recursively, instances included.
    pub async fn delete_challenge_dir(&self, challenge_id: &str) -> Result<()> {
        let dir = self.challenge_dir(challenge_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Challenge {
        Challenge {
            id: "c1".to_string(),
            scenario: "./fixtures/static".to_string(),
            hash: "deadbeef".to_string(),
            until: None,
            timeout: Some(600),
            min: None,
            max: Some(50),
            additional: BTreeMap::from([("k".to_string(), "v".to_string())]),
            image_pull_secrets: vec!["regcred".to_string()],
        }
    }

    #[tokio::test]
    async fn test_challenge_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());

        let challenge = sample();
        store.write_challenge(&challenge).await.unwrap();

        let loaded = store.read_challenge("c1").await.unwrap();
        assert_eq!(loaded, challenge);
    }

    #[tokio::test]
    async fn test_challenge_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());

        let result = store.read_challenge("missing").await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_challenge_exists() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());

        assert!(!store.challenge_exists("c1").await.unwrap());
        store.write_challenge(&sample()).await.unwrap();
        assert!(store.challenge_exists("c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_challenge_tolerates_unknown_fields() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());

        let dir = tmp.path().join("chall").join("c1");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(
            dir.join("info.json"),
            r#"{"id":"c1","scenario":"./s","hash":"h","future_field":42}"#,
        )
        .await
        .unwrap();

        let loaded = store.read_challenge("c1").await.unwrap();
        assert_eq!(loaded.id, "c1");
        assert!(loaded.additional.is_empty());
    }

    #[tokio::test]
    async fn test_challenge_corrupt_record() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());

        let dir = tmp.path().join("chall").join("c1");
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("info.json"), b"{not json")
            .await
            .unwrap();

        let result = store.read_challenge("c1").await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_list_challenges() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());

        assert!(store.list_challenges().await.unwrap().is_empty());

        let mut a = sample();
        a.id = "a".to_string();
        let mut b = sample();
        b.id = "b".to_string();
        store.write_challenge(&a).await.unwrap();
        store.write_challenge(&b).await.unwrap();

        assert_eq!(store.list_challenges().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_delete_challenge_dir() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());

        store.write_challenge(&sample()).await.unwrap();
        store.delete_challenge_dir("c1").await.unwrap();

        assert!(!store.challenge_exists("c1").await.unwrap());
        // Deleting again is a no-op.
        store.delete_challenge_dir("c1").await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_challenge_id() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());

        let result = store.read_challenge("../escape").await;
        assert!(matches!(result, Err(StoreError::InvalidKey(_))));
    }
}
