// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! OCI distribution client.
//!
//! Speaks just enough of the distribution API to pull a scenario artifact:
//! fetch the manifest, pick the archive layer, download and verify the blob,
//! and extract it into a target directory. Token (Bearer) and basic auth are
//! supported; `insecure` switches to plain HTTP for local registries.

use std::path::Path;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use flagforge_core::config::OciConfig;

use crate::error::{ScenarioError, ScenarioResult};
use crate::reference::OciReference;

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.artifact.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(rename = "mediaType", default)]
    media_type: String,
    digest: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    access_token: String,
}

/// HTTP client for pulling scenario artifacts from an OCI registry.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    insecure: bool,
    username: Option<String>,
    password: Option<String>,
}

impl RegistryClient {
    /// Build a client from the OCI configuration.
    pub fn new(config: &OciConfig) -> ScenarioResult<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| ScenarioError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            insecure: config.insecure,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn scheme(&self) -> &'static str {
        if self.insecure { "http" } else { "https" }
    }

    /// Pull `reference` and extract its archive layer into `dest`.
    ///
    /// Returns the digest of the archive layer, which doubles as the cache
    /// key for the extracted contents.
    pub async fn pull(&self, reference: &OciReference, dest: &Path) -> ScenarioResult<String> {
        let manifest_ref = reference
            .digest
            .clone()
            .unwrap_or_else(|| reference.tag.clone());
        let manifest_url = format!(
            "{}://{}/v2/{}/manifests/{}",
            self.scheme(),
            reference.registry,
            reference.repository,
            manifest_ref
        );

        let (body, token) = self
            .get_with_auth(&manifest_url, reference, Some(MANIFEST_ACCEPT))
            .await?;
        let manifest: Manifest = serde_json::from_slice(&body)
            .map_err(|e| ScenarioError::InvalidArtifact(format!("manifest: {e}")))?;

        let layer = manifest
            .layers
            .iter()
            .find(|l| l.media_type.contains("tar"))
            .or_else(|| manifest.layers.first())
            .ok_or_else(|| ScenarioError::InvalidArtifact("manifest has no layers".to_string()))?;

        debug!(
            digest = %layer.digest,
            media_type = %layer.media_type,
            "Selected scenario layer"
        );

        let blob_url = format!(
            "{}://{}/v2/{}/blobs/{}",
            self.scheme(),
            reference.registry,
            reference.repository,
            layer.digest
        );
        let blob = self.get_blob(&blob_url, token.as_deref()).await?;

        verify_digest(&layer.digest, &blob)?;
        extract_archive(&blob, dest).await?;

        info!(
            registry = %reference.registry,
            repository = %reference.repository,
            digest = %layer.digest,
            "Pulled scenario artifact"
        );
        Ok(layer.digest.clone())
    }

    /// GET a URL, negotiating a Bearer token on a 401 challenge.
    ///
    /// Returns the body and the token that worked (if any) so blob requests
    /// can reuse it.
    async fn get_with_auth(
        &self,
        url: &str,
        reference: &OciReference,
        accept: Option<&str>,
    ) -> ScenarioResult<(Vec<u8>, Option<String>)> {
        let response = self.get(url, accept, None).await?;
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok((check_body(response).await?, None));
        }

        let challenge = response
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                ScenarioError::Unauthenticated("registry returned 401 without challenge".into())
            })?;

        let token = self.fetch_token(&challenge, reference).await?;
        let response = self.get(url, accept, Some(&token)).await?;
        Ok((check_body(response).await?, Some(token)))
    }

    async fn get_blob(&self, url: &str, token: Option<&str>) -> ScenarioResult<Vec<u8>> {
        let response = self.get(url, None, token).await?;
        check_body(response).await
    }

    async fn get(
        &self,
        url: &str,
        accept: Option<&str>,
        token: Option<&str>,
    ) -> ScenarioResult<reqwest::Response> {
        let mut request = self.http.get(url);
        if let Some(accept) = accept {
            request = request.header(reqwest::header::ACCEPT, accept);
        }
        if let Some(token) = token {
            request = request.bearer_auth(token);
        } else if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }
        request
            .send()
            .await
            .map_err(|e| ScenarioError::Unavailable(e.to_string()))
    }

    /// Resolve a `WWW-Authenticate: Bearer realm=...,service=...` challenge.
    async fn fetch_token(
        &self,
        challenge: &str,
        reference: &OciReference,
    ) -> ScenarioResult<String> {
        let params = parse_challenge(challenge);
        let realm = params.get("realm").ok_or_else(|| {
            ScenarioError::Unauthenticated(format!("unsupported challenge: {challenge}"))
        })?;

        let mut request = self.http.get(realm).query(&[(
            "scope",
            format!("repository:{}:pull", reference.repository),
        )]);
        if let Some(service) = params.get("service") {
            request = request.query(&[("service", service.as_str())]);
        }
        if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ScenarioError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ScenarioError::Unauthenticated(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ScenarioError::Unauthenticated(e.to_string()))?;
        let token = if token.token.is_empty() {
            token.access_token
        } else {
            token.token
        };
        if token.is_empty() {
            return Err(ScenarioError::Unauthenticated(
                "token endpoint returned no token".to_string(),
            ));
        }
        Ok(token)
    }
}

async fn check_body(response: reqwest::Response) -> ScenarioResult<Vec<u8>> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ScenarioError::Unauthenticated(format!(
            "registry returned {status}"
        )));
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ScenarioError::InvalidArtifact(
            "artifact not found in registry".to_string(),
        ));
    }
    if !status.is_success() {
        return Err(ScenarioError::Unavailable(format!(
            "registry returned {status}"
        )));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ScenarioError::Unavailable(e.to_string()))?;
    Ok(bytes.to_vec())
}

/// Parse the key="value" pairs of a Bearer challenge header.
fn parse_challenge(challenge: &str) -> std::collections::HashMap<String, String> {
    let rest = challenge.strip_prefix("Bearer ").unwrap_or(challenge);
    rest.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            Some((key.to_string(), value.trim_matches('"').to_string()))
        })
        .collect()
}

fn verify_digest(expected: &str, blob: &[u8]) -> ScenarioResult<()> {
    let Some(hex_digest) = expected.strip_prefix("sha256:") else {
        return Err(ScenarioError::InvalidArtifact(format!(
            "unsupported digest algorithm: {expected}"
        )));
    };
    let actual = hex::encode(Sha256::digest(blob));
    if actual != hex_digest {
        return Err(ScenarioError::InvalidArtifact(format!(
            "digest mismatch: manifest says {expected}, blob is sha256:{actual}"
        )));
    }
    Ok(())
}

/// Extract a tar or tar.gz archive into `dest`.
pub(crate) async fn extract_archive(bytes: &[u8], dest: &Path) -> ScenarioResult<()> {
    let bytes = bytes.to_vec();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> ScenarioResult<()> {
        std::fs::create_dir_all(&dest)?;
        // Gzip magic bytes; plain tar is accepted too.
        if bytes.starts_with(&[0x1f, 0x8b]) {
            let decoder = flate2::read::GzDecoder::new(bytes.as_slice());
            tar::Archive::new(decoder)
                .unpack(&dest)
                .map_err(|e| ScenarioError::InvalidArtifact(format!("tar.gz: {e}")))?;
        } else {
            tar::Archive::new(bytes.as_slice())
                .unpack(&dest)
                .map_err(|e| ScenarioError::InvalidArtifact(format!("tar: {e}")))?;
        }
        Ok(())
    })
    .await
    .map_err(|e| ScenarioError::InvalidArtifact(format!("extraction task failed: {e}")))?
}
