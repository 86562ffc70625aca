// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Named lock service.
//!
//! Serializes mutations on challenges and instances. Two scopes exist:
//! a challenge lock covering every operation that must observe a stable
//! challenge record, and an instance lock covering one `(challenge_id,
//! source_id)` pair.
//!
//! Callers must respect the ordering rule: acquire the challenge lock first,
//! then at most one instance lock under it, and never re-acquire a challenge
//! lock while holding one. The service does not detect violations.
//!
//! Acquisition inherits the caller's deadline: every `acquire` takes an
//! optional [`Instant`] past which it gives up with [`LockError::Cancelled`].
//! The gRPC layer derives that instant from the request's `grpc-timeout`, so
//! a client that stops waiting stops queueing.
//!
//! Two backends share the [`LockBackend`] contract: [`local::LocalLockBackend`]
//! (process-wide, refcounted mutex table) and [`etcd::EtcdLockBackend`]
//! (leased locks on an external etcd cluster).

pub mod etcd;
pub mod local;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

/// Errors from lock operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LockError {
    /// The deadline passed before the lock was granted.
    #[error("Lock acquisition cancelled")]
    Cancelled,

    /// The backend failed.
    #[error("Lock backend error: {0}")]
    Backend(String),

    /// etcd operation failed.
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),
}

/// Result type for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;

/// A held lock. Dropping it releases the lock best-effort; call
/// [`LockGuard::release`] to observe release errors.
#[async_trait]
pub trait Lock: Send {
    /// Release the lock. Idempotent: subsequent calls are no-ops.
    async fn release(&mut self) -> Result<()>;
}

/// Backend granting named mutual-exclusion locks.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Block until the named lock is granted or `deadline` passes.
    ///
    /// A lapsed deadline yields [`LockError::Cancelled`] and leaves no
    /// backend state behind. Cancel-safe: dropping the returned future
    /// before completion must not leak backend state either.
    async fn acquire(&self, name: &str, deadline: Option<Instant>) -> Result<LockGuard>;
}

/// Guard for a held named lock.
pub struct LockGuard {
    inner: Box<dyn Lock>,
}

impl LockGuard {
    /// Wrap a backend-specific lock.
    pub fn new(inner: Box<dyn Lock>) -> Self {
        Self { inner }
    }

    /// Release the lock, surfacing backend errors.
    pub async fn release(mut self) -> Result<()> {
        self.inner.release().await
    }
}

/// Lock service handing out challenge- and instance-scoped guards.
#[derive(Clone)]
pub struct LockService {
    backend: Arc<dyn LockBackend>,
}

impl LockService {
    /// Create a service over an explicit backend.
    pub fn new(backend: Arc<dyn LockBackend>) -> Self {
        Self { backend }
    }

    /// Create a service over the in-process backend.
    pub fn local() -> Self {
        Self::new(Arc::new(local::LocalLockBackend::new()))
    }

    /// Acquire the lock covering a whole challenge.
    pub async fn lock_challenge(
        &self,
        challenge_id: &str,
        deadline: Option<Instant>,
    ) -> Result<LockGuard> {
        self.backend
            .acquire(&format!("chall/{challenge_id}"), deadline)
            .await
    }

    /// Acquire the lock covering one instance of a challenge.
    pub async fn lock_instance(
        &self,
        challenge_id: &str,
        source_id: &str,
        deadline: Option<Instant>,
    ) -> Result<LockGuard> {
        self.backend
            .acquire(&format!("chall/{challenge_id}/src/{source_id}"), deadline)
            .await
    }
}
