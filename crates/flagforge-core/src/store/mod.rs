// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Filesystem-rooted record store.
//!
//! Durable state lives under a single root directory:
//!
//! ```text
//! <root>/chall/<challenge_id>/info.json
//! <root>/chall/<challenge_id>/instance/<identity>/info.json
//! <root>/chall/<challenge_id>/instance/<identity>/state/deployment.json
//! <root>/chall/<challenge_id>/instance/<identity>/state/scenario/
//! ```
//!
//! Records are JSON and written atomically (sibling temp file, then rename),
//! so a reader never observes a torn record. The store itself does no
//! locking: concurrent mutation is serialized by the lock service.

mod challenge;
mod instance;

pub use challenge::Challenge;
pub use instance::Instance;

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::fs;

/// Errors from store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The requested record does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A key would escape the store root or is empty.
    #[error("Invalid store key: {0:?}")]
    InvalidKey(String),

    /// A record exists but cannot be decoded.
    #[error("Corrupt record at {path}: {source}")]
    Corrupt {
        /// Path of the unreadable record.
        path: String,
        /// Decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// JSON encoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Filesystem store for challenge and instance records.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one challenge.
    pub fn challenge_dir(&self, challenge_id: &str) -> Result<PathBuf> {
        Ok(self.root.join("chall").join(component(challenge_id)?))
    }

    /// Directory holding one instance of a challenge.
    pub fn instance_dir(&self, challenge_id: &str, identity: &str) -> Result<PathBuf> {
        Ok(self
            .challenge_dir(challenge_id)?
            .join("instance")
            .join(component(identity)?))
    }

    /// Directory holding an instance's engine state and scenario working copy.
    pub fn state_dir(&self, challenge_id: &str, identity: &str) -> Result<PathBuf> {
        Ok(self.instance_dir(challenge_id, identity)?.join("state"))
    }

    /// Per-instance scenario working directory.
    pub fn scenario_dir(&self, challenge_id: &str, identity: &str) -> Result<PathBuf> {
        Ok(self.state_dir(challenge_id, identity)?.join("scenario"))
    }

    /// Write `value` as JSON to `path` atomically.
    pub(crate) async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        write_atomic(path, &bytes).await
    }

    /// Read JSON from `path`, mapping absence to [`StoreError::NotFound`].
    pub(crate) async fn read_json<T: DeserializeOwned>(
        &self,
        path: &Path,
        what: &str,
    ) -> Result<T> {
        let bytes = match fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(what.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: path.display().to_string(),
            source,
        })
    }

    /// List subdirectory names of `dir`, skipping entries that vanish while
    /// the walk is in flight. A missing `dir` yields an empty list.
    pub(crate) async fn list_dirs(&self, dir: &Path) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_type = match entry.file_type().await {
                Ok(t) => t,
                Err(_) => continue, // vanished mid-walk
            };
            if !file_type.is_dir() {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Reject keys that would traverse outside the store root.
fn component(key: &str) -> Result<&str> {
    if key.is_empty()
        || key == "."
        || key == ".."
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0')
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(key)
}

/// Write `bytes` to `path` through a sibling temp file and rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}
