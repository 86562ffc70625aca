// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! etcd lock backend.
//!
//! Grants each lock under a short-lived lease so that a crashed holder
//! cannot wedge a name forever: if the process dies without releasing, the
//! lease expires and etcd frees the lock.

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, LockOptions};
use tokio::time::Instant;
use tracing::warn;

use crate::config::EtcdConfig;

use super::{Lock, LockBackend, LockError, LockGuard, Result};

/// Lease TTL in seconds. Bounds how long a lock can outlive a dead holder.
const LEASE_TTL_SECS: i64 = 60;

/// Distributed lock backend over etcd.
pub struct EtcdLockBackend {
    client: Client,
}

impl EtcdLockBackend {
    /// Connect to the configured etcd endpoint.
    pub async fn connect(config: &EtcdConfig) -> Result<Self> {
        let options = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => Some(ConnectOptions::new().with_user(user, pass)),
            _ => None,
        };
        let client = Client::connect([config.endpoint.clone()], options).await?;
        Ok(Self { client })
    }
}

struct EtcdLock {
    client: Client,
    /// Lock ownership key returned by etcd; `None` once released.
    key: Option<Vec<u8>>,
    lease: i64,
}

#[async_trait]
impl Lock for EtcdLock {
    async fn release(&mut self) -> Result<()> {
        let Some(key) = self.key.take() else {
            return Ok(());
        };
        let mut client = self.client.clone();
        client.unlock(key).await?;
        // The lease would expire on its own; revoking just frees it earlier.
        if let Err(e) = client.lease_revoke(self.lease).await {
            warn!(lease = self.lease, error = %e, "Failed to revoke lock lease");
        }
        Ok(())
    }
}

impl Drop for EtcdLock {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        // Best-effort async release; the lease TTL covers the failure paths
        // (no runtime, unlock error, process death).
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let mut client = self.client.clone();
            let lease = self.lease;
            handle.spawn(async move {
                if let Err(e) = client.unlock(key).await {
                    warn!(error = %e, "Failed to unlock dropped etcd lock");
                }
                let _ = client.lease_revoke(lease).await;
            });
        }
    }
}

#[async_trait]
impl LockBackend for EtcdLockBackend {
    async fn acquire(&self, name: &str, deadline: Option<Instant>) -> Result<LockGuard> {
        let grant_and_lock = async {
            let mut client = self.client.clone();
            let lease = client.lease_grant(LEASE_TTL_SECS, None).await?.id();
            let response = client
                .lock(name, Some(LockOptions::new().with_lease(lease)))
                .await?;
            Ok::<_, LockError>((lease, response.key().to_vec()))
        };

        // A lapsed deadline abandons the in-flight grant/lock; the lease TTL
        // frees whatever etcd handed out after we stopped listening.
        let (lease, key) = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, grant_and_lock)
                .await
                .map_err(|_| LockError::Cancelled)??,
            None => grant_and_lock.await?,
        };

        Ok(LockGuard::new(Box::new(EtcdLock {
            client: self.client.clone(),
            key: Some(key),
            lease,
        })))
    }
}
