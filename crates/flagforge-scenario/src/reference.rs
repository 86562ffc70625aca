// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scenario reference parsing.

use std::path::PathBuf;

use crate::error::{ScenarioError, ScenarioResult};

/// Where a scenario comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioRef {
    /// An artifact in an OCI registry (`oci://registry/name:tag[@digest]`).
    Oci(OciReference),
    /// A local directory, used as-is and treated read-only.
    Dir(PathBuf),
}

/// A parsed OCI artifact reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciReference {
    /// Registry host, e.g. `registry.example.com` or `localhost:5000`.
    pub registry: String,
    /// Repository path, e.g. `ctf/my-challenge`.
    pub repository: String,
    /// Tag; defaults to `latest`.
    pub tag: String,
    /// Optional pinned digest (`sha256:...`).
    pub digest: Option<String>,
}

impl ScenarioRef {
    /// Parse a scenario reference string.
    ///
    /// `oci://` prefixed strings are registry references; anything else is
    /// taken as a local directory path (existence is checked at load time).
    pub fn parse(reference: &str) -> ScenarioResult<Self> {
        if reference.is_empty() {
            return Err(ScenarioError::InvalidReference("empty".to_string()));
        }

        let Some(rest) = reference.strip_prefix("oci://") else {
            return Ok(ScenarioRef::Dir(PathBuf::from(reference)));
        };

        let (registry, remainder) = rest
            .split_once('/')
            .ok_or_else(|| ScenarioError::InvalidReference(reference.to_string()))?;
        if registry.is_empty() || remainder.is_empty() {
            return Err(ScenarioError::InvalidReference(reference.to_string()));
        }

        let (named, digest) = match remainder.split_once('@') {
            Some((named, digest)) => {
                if !digest.starts_with("sha256:") {
                    return Err(ScenarioError::InvalidReference(reference.to_string()));
                }
                (named, Some(digest.to_string()))
            }
            None => (remainder, None),
        };

        // A ':' after the last '/' separates the tag from the repository.
        let (repository, tag) = match named.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo, tag.to_string()),
            _ => (named, "latest".to_string()),
        };
        if repository.is_empty() || tag.is_empty() {
            return Err(ScenarioError::InvalidReference(reference.to_string()));
        }

        Ok(ScenarioRef::Oci(OciReference {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag,
            digest,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_local_dir() {
        let parsed = ScenarioRef::parse("./fixtures/static").unwrap();
        assert_eq!(parsed, ScenarioRef::Dir(PathBuf::from("./fixtures/static")));
    }

    #[test]
    fn test_parse_oci_full() {
        let parsed =
            ScenarioRef::parse("oci://registry.example.com/ctf/chall:v1@sha256:abc123").unwrap();
        let ScenarioRef::Oci(r) = parsed else {
            panic!("expected OCI reference");
        };
        assert_eq!(r.registry, "registry.example.com");
        assert_eq!(r.repository, "ctf/chall");
        assert_eq!(r.tag, "v1");
        assert_eq!(r.digest.as_deref(), Some("sha256:abc123"));
    }

    #[test]
    fn test_parse_oci_default_tag() {
        let parsed = ScenarioRef::parse("oci://localhost:5000/chall").unwrap();
        let ScenarioRef::Oci(r) = parsed else {
            panic!("expected OCI reference");
        };
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "chall");
        assert_eq!(r.tag, "latest");
        assert!(r.digest.is_none());
    }

    #[test]
    fn test_parse_oci_registry_port_not_mistaken_for_tag() {
        // The ':' belongs to the registry host here, not a tag.
        let parsed = ScenarioRef::parse("oci://localhost:5000/ctf/chall:stable").unwrap();
        let ScenarioRef::Oci(r) = parsed else {
            panic!("expected OCI reference");
        };
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "ctf/chall");
        assert_eq!(r.tag, "stable");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(ScenarioRef::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_bare_registry() {
        assert!(ScenarioRef::parse("oci://registry.example.com").is_err());
        assert!(ScenarioRef::parse("oci://registry.example.com/").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_digest() {
        assert!(ScenarioRef::parse("oci://reg.example.com/chall@md5:abc").is_err());
    }
}
