// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process lock backend.
//!
//! Keeps a table of refcounted mutexes keyed by lock name. Entries are
//! created on first acquisition and removed when the last interested party
//! lets go, so the table stays proportional to the set of locks actually in
//! use, not the set of names ever seen.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use super::{Lock, LockBackend, LockError, LockGuard, Result};

struct Entry {
    lock: Arc<Mutex<()>>,
    refs: usize,
}

type Table = Arc<StdMutex<HashMap<String, Entry>>>;

/// Process-wide lock backend.
#[derive(Default)]
pub struct LocalLockBackend {
    table: Table,
}

impl LocalLockBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live table entries. Exposed for tests.
    pub fn entries(&self) -> usize {
        self.table.lock().unwrap().len()
    }
}

/// Holds one reference on a table entry; decrements on drop.
///
/// Taken before awaiting the mutex so that a cancelled acquisition still
/// returns its reference.
struct Reservation {
    table: Table,
    name: String,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap();
        if let Some(entry) = table.get_mut(&self.name) {
            entry.refs -= 1;
            if entry.refs == 0 {
                table.remove(&self.name);
            }
        }
    }
}

struct LocalLock {
    guard: Option<OwnedMutexGuard<()>>,
    reservation: Option<Reservation>,
}

#[async_trait]
impl Lock for LocalLock {
    async fn release(&mut self) -> Result<()> {
        drop(self.guard.take());
        drop(self.reservation.take());
        Ok(())
    }
}

#[async_trait]
impl LockBackend for LocalLockBackend {
    async fn acquire(&self, name: &str, deadline: Option<Instant>) -> Result<LockGuard> {
        let lock = {
            let mut table = self.table.lock().unwrap();
            let entry = table.entry(name.to_string()).or_insert_with(|| Entry {
                lock: Arc::new(Mutex::new(())),
                refs: 0,
            });
            entry.refs += 1;
            entry.lock.clone()
        };

        let reservation = Reservation {
            table: self.table.clone(),
            name: name.to_string(),
        };

        // If the caller drops us here, or the deadline lapses, `reservation`
        // unwinds the refcount.
        let guard = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, lock.lock_owned())
                .await
                .map_err(|_| LockError::Cancelled)?,
            None => lock.lock_owned().await,
        };

        Ok(LockGuard::new(Box::new(LocalLock {
            guard: Some(guard),
            reservation: Some(reservation),
        })))
    }
}
