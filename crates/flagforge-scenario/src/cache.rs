// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Content-addressed scenario cache.
//!
//! Resolves a scenario reference to a local working directory:
//! - local directories are used in place (read-only);
//! - OCI artifacts and inline archives are extracted under the cache root,
//!   keyed by content digest so identical content is materialized once.
//!
//! Concurrent callers for the same key synchronize on a per-key mutex:
//! exactly one performs the fetch/extract, the rest observe the result.
//! Entries live for the process lifetime unless explicitly invalidated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use flagforge_core::config::OciConfig;

use crate::error::{ScenarioError, ScenarioResult};
use crate::project::Project;
use crate::reference::{OciReference, ScenarioRef};
use crate::registry::{RegistryClient, extract_archive};

/// Scenario cache with per-key single-flight.
pub struct ScenarioCache {
    root: PathBuf,
    registry: RegistryClient,
    flights: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Number of actual materializations (fetch + extract). Cache hits and
    /// single-flight followers do not count. Exposed for tests.
    materializations: AtomicUsize,
}

impl ScenarioCache {
    /// Create a cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, oci: &OciConfig) -> ScenarioResult<Self> {
        Ok(Self {
            root: root.into(),
            registry: RegistryClient::new(oci)?,
            flights: StdMutex::new(HashMap::new()),
            materializations: AtomicUsize::new(0),
        })
    }

    /// Cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// How many fetch/extract operations actually ran.
    pub fn materializations(&self) -> usize {
        self.materializations.load(Ordering::SeqCst)
    }

    /// Resolve `reference` to a working directory containing a valid project
    /// descriptor.
    pub async fn load(&self, reference: &str) -> ScenarioResult<PathBuf> {
        match ScenarioRef::parse(reference)? {
            ScenarioRef::Dir(dir) => {
                if !dir.is_dir() {
                    return Err(ScenarioError::InvalidReference(format!(
                        "no such directory: {}",
                        dir.display()
                    )));
                }
                Project::load(&dir)?;
                Ok(dir)
            }
            ScenarioRef::Oci(oci) => self.load_oci(reference, &oci).await,
        }
    }

    /// Extract an inline archive into the cache, keyed by its content.
    ///
    /// Used when a challenge is registered or updated with scenario bytes
    /// instead of a reference. Returns the working directory.
    pub async fn store_archive(&self, bytes: &[u8]) -> ScenarioResult<PathBuf> {
        let key = hex::encode(Sha256::digest(bytes));
        self.materialize(&key, || async {
            let dir = self.scratch_dir();
            extract_archive(bytes, &dir).await?;
            Ok(dir)
        })
        .await
    }

    /// Drop the cache entry for `reference`, forcing the next load to fetch.
    pub async fn invalidate(&self, reference: &str) -> ScenarioResult<()> {
        let ScenarioRef::Oci(oci) = ScenarioRef::parse(reference)? else {
            return Ok(()); // local dirs are not cached
        };
        let key = self.oci_key(&oci);
        let flight = self.flight(&key);
        let _guard = flight.lock().await;

        let dir = self.entry_dir(&key);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(key = %key, "Invalidated cached scenario");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_oci(&self, reference: &str, oci: &OciReference) -> ScenarioResult<PathBuf> {
        let key = self.oci_key(oci);
        let dir = self
            .materialize(&key, || async {
                let dir = self.scratch_dir();
                self.registry.pull(oci, &dir).await?;
                Ok(dir)
            })
            .await?;
        debug!(reference = %reference, dir = %dir.display(), "Scenario resolved");
        Ok(dir)
    }

    /// Single-flight materialization of one cache entry.
    ///
    /// `fetch` extracts into a scratch directory; the result is renamed into
    /// place so a cache entry either exists completely or not at all.
    async fn materialize<F, Fut>(&self, key: &str, fetch: F) -> ScenarioResult<PathBuf>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ScenarioResult<PathBuf>>,
    {
        let flight = self.flight(key);
        let _guard = flight.lock().await;

        let entry = self.entry_dir(key);
        if entry.is_dir() {
            return Ok(entry);
        }

        let scratch = fetch().await?;
        if let Err(e) = Project::load(&scratch) {
            let _ = tokio::fs::remove_dir_all(&scratch).await;
            return Err(e);
        }

        if let Some(parent) = entry.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&scratch, &entry).await?;
        self.materializations.fetch_add(1, Ordering::SeqCst);

        info!(key = %key, dir = %entry.display(), "Materialized scenario");
        Ok(entry)
    }

    fn flight(&self, key: &str) -> Arc<Mutex<()>> {
        let mut flights = self.flights.lock().unwrap();
        flights.entry(key.to_string()).or_default().clone()
    }

    fn oci_key(&self, oci: &OciReference) -> String {
        match &oci.digest {
            // Content-addressed when the reference pins a digest.
            Some(digest) => digest.replace(':', "-"),
            // Otherwise a stable hash of the reference itself.
            None => {
                let raw = format!("{}/{}:{}", oci.registry, oci.repository, oci.tag);
                hex::encode(Sha256::digest(raw.as_bytes()))
            }
        }
    }

    fn entry_dir(&self, key: &str) -> PathBuf {
        self.root.join("scenarios").join(key)
    }

    fn scratch_dir(&self) -> PathBuf {
        self.root
            .join("tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }
}

/// Compute a stable digest of a directory's contents.
///
/// Hashes relative paths and file bytes in sorted order, so the digest is
/// independent of walk order and filesystem metadata.
pub fn dir_digest(dir: &Path) -> ScenarioResult<String> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for relative in &files {
        hasher.update(relative.as_bytes());
        hasher.update([0]);
        let bytes = std::fs::read(dir.join(relative))?;
        hasher.update(&bytes);
        hasher.update([0]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> ScenarioResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_string_lossy().into_owned());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn archive_with_descriptor(name: &str) -> Vec<u8> {
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        let content = format!("name: {name}\n");
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "Pulumi.yaml", content.as_bytes())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn cache(root: &Path) -> ScenarioCache {
        ScenarioCache::new(root, &OciConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_load_local_dir() {
        let tmp = TempDir::new().unwrap();
        let scenario = tmp.path().join("scenario");
        std::fs::create_dir_all(&scenario).unwrap();
        std::fs::write(scenario.join("Pulumi.yaml"), "name: local\n").unwrap();

        let cache = cache(&tmp.path().join("cache"));
        let dir = cache.load(scenario.to_str().unwrap()).await.unwrap();
        assert_eq!(dir, scenario);
        assert_eq!(cache.materializations(), 0);
    }

    #[tokio::test]
    async fn test_load_local_dir_missing() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp.path().join("cache"));

        let result = cache.load(tmp.path().join("absent").to_str().unwrap()).await;
        assert!(matches!(result, Err(ScenarioError::InvalidReference(_))));
    }

    #[tokio::test]
    async fn test_load_local_dir_without_descriptor() {
        let tmp = TempDir::new().unwrap();
        let scenario = tmp.path().join("scenario");
        std::fs::create_dir_all(&scenario).unwrap();

        let cache = cache(&tmp.path().join("cache"));
        let result = cache.load(scenario.to_str().unwrap()).await;
        assert!(matches!(
            result,
            Err(ScenarioError::InvalidDescriptor { .. })
        ));
    }

    #[tokio::test]
    async fn test_store_archive_is_cached() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp.path().join("cache"));
        let archive = archive_with_descriptor("x");

        let first = cache.store_archive(&archive).await.unwrap();
        let second = cache.store_archive(&archive).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.materializations(), 1);
        assert!(first.join("Pulumi.yaml").exists());
    }

    #[tokio::test]
    async fn test_store_archive_single_flight() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(cache(&tmp.path().join("cache")));
        let archive = archive_with_descriptor("x");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let archive = archive.clone();
            handles.push(tokio::spawn(
                async move { cache.store_archive(&archive).await },
            ));
        }

        let mut dirs = Vec::new();
        for handle in handles {
            dirs.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(cache.materializations(), 1);
        assert!(dirs.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_store_archive_distinct_contents() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp.path().join("cache"));

        let a = cache
            .store_archive(&archive_with_descriptor("a"))
            .await
            .unwrap();
        let b = cache
            .store_archive(&archive_with_descriptor("b"))
            .await
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(cache.materializations(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_local_is_noop() {
        let tmp = TempDir::new().unwrap();
        let cache = cache(&tmp.path().join("cache"));
        cache.invalidate("./wherever").await.unwrap();
    }

    #[test]
    fn test_dir_digest_stable() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "one").unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("sub/b.txt"), "two").unwrap();

        let first = dir_digest(tmp.path()).unwrap();
        let second = dir_digest(tmp.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_dir_digest_changes_with_content() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "one").unwrap();
        let before = dir_digest(tmp.path()).unwrap();

        std::fs::write(tmp.path().join("a.txt"), "two").unwrap();
        let after = dir_digest(tmp.path()).unwrap();

        assert_ne!(before, after);
    }
}
