// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background expirer for instances past their `until`.
//!
//! Sweeps run on a ticker or a cron schedule. A sweep enumerates every
//! instance, and deletes the expired ones through the same lock-guarded path
//! the API uses, so a janitor delete racing a client operation simply waits
//! its turn; a renewal that lands first wins (expiry is re-checked under the
//! lock). Failures are logged and retried on the next sweep.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use flagforge_core::config::JanitorConfig;
use flagforge_core::lock::LockError;
use flagforge_core::store::StoreError;

use crate::error::{Error, Result};
use crate::instance;
use crate::state::AppState;

/// How long an expiry waits for a contended lock before conceding the race
/// to the client operation holding it. The next sweep retries.
const LOCK_WAIT: Duration = Duration::from_secs(30);

/// When the janitor wakes up.
pub enum Mode {
    /// Fixed interval between sweeps.
    Ticker(Duration),
    /// Cron schedule deciding the wake-up moments.
    Cron(Box<cron::Schedule>),
}

/// Background instance expirer.
pub struct Janitor {
    state: Arc<AppState>,
    mode: Mode,
    shutdown: Arc<Notify>,
}

impl Janitor {
    /// Create a janitor with an explicit mode.
    pub fn new(state: Arc<AppState>, mode: Mode) -> Self {
        Self {
            state,
            mode,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Create a janitor from configuration. A cron expression, when present,
    /// takes precedence over the ticker interval.
    pub fn from_config(state: Arc<AppState>, config: &JanitorConfig) -> Result<Self> {
        Ok(Self::new(state, mode_from_config(config)?))
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the janitor loop until shutdown is signalled.
    pub async fn run(&self) {
        match &self.mode {
            Mode::Ticker(interval) => {
                info!(interval_secs = interval.as_secs(), "Janitor started (ticker)");
            }
            Mode::Cron(_) => info!("Janitor started (cron)"),
        }

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Janitor received shutdown signal");
                    break;
                }

                _ = self.wait() => {
                    let (expired, failed) = self.sweep().await;
                    if expired > 0 || failed > 0 {
                        info!(expired = expired, failed = failed, "Janitor sweep completed");
                    } else {
                        debug!("Janitor sweep completed, nothing expired");
                    }
                }
            }
        }

        info!("Janitor stopped");
    }

    async fn wait(&self) {
        match &self.mode {
            Mode::Ticker(interval) => tokio::time::sleep(*interval).await,
            Mode::Cron(schedule) => {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    // Schedule with no future firing; park until shutdown.
                    std::future::pending::<()>().await;
                    return;
                };
                let delay = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Enumerate all instances and delete the expired ones.
    ///
    /// Returns `(deleted, failed)` counts.
    pub async fn sweep(&self) -> (u64, u64) {
        let mut deleted = 0u64;
        let mut failed = 0u64;

        let challenge_ids = match self.state.store.list_challenges().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Janitor failed to list challenges");
                return (0, 1);
            }
        };

        for challenge_id in challenge_ids {
            let identities = match self.state.store.list_instances(&challenge_id).await {
                Ok(identities) => identities,
                Err(e) => {
                    warn!(challenge_id = %challenge_id, error = %e, "Janitor failed to list instances");
                    failed += 1;
                    continue;
                }
            };

            for identity in identities {
                let instance = match self.state.store.read_instance(&challenge_id, &identity).await
                {
                    Ok(instance) => instance,
                    Err(StoreError::NotFound(_)) => continue, // deleted mid-sweep
                    Err(e) => {
                        warn!(
                            challenge_id = %challenge_id,
                            identity = %identity,
                            error = %e,
                            "Janitor failed to read instance"
                        );
                        failed += 1;
                        continue;
                    }
                };

                if !instance.expired_at(Utc::now()) {
                    continue;
                }

                match self.expire(&challenge_id, &identity).await {
                    Ok(true) => deleted += 1,
                    Ok(false) => {} // renewed or deleted while we waited for the lock
                    Err(e) => {
                        warn!(
                            challenge_id = %challenge_id,
                            identity = %identity,
                            error = %e,
                            "Janitor failed to delete expired instance, will retry next sweep"
                        );
                        failed += 1;
                    }
                }
            }
        }

        (deleted, failed)
    }

    /// Delete one expired instance under the usual locks.
    ///
    /// Lock acquisition is bounded by [`LOCK_WAIT`]: a client operation
    /// holding the lock longer than that simply wins the race. Expiry is
    /// also re-checked once the locks are held, so a renewal that beat us
    /// to the lock wins too. Returns `Ok(false)` when there was nothing to
    /// do.
    async fn expire(&self, challenge_id: &str, identity: &str) -> Result<bool> {
        let state = &self.state;
        let deadline = Some(Instant::now() + LOCK_WAIT);

        let _lc = match state.locks.lock_challenge(challenge_id, deadline).await {
            Ok(guard) => guard,
            Err(LockError::Cancelled) => return Ok(false), // lost the race
            Err(e) => return Err(e.into()),
        };

        let challenge = match state.store.read_challenge(challenge_id).await {
            Ok(challenge) => challenge,
            Err(StoreError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let instance = match state.store.read_instance(challenge_id, identity).await {
            Ok(instance) => instance,
            Err(StoreError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let _li = match state
            .locks
            .lock_instance(challenge_id, &instance.source_id, deadline)
            .await
        {
            Ok(guard) => guard,
            Err(LockError::Cancelled) => return Ok(false), // lost the race
            Err(e) => return Err(e.into()),
        };
        let instance = match state.store.read_instance(challenge_id, identity).await {
            Ok(instance) => instance,
            Err(StoreError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if !instance.expired_at(Utc::now()) {
            return Ok(false);
        }

        instance::destroy(state, &challenge, &instance).await?;
        info!(
            challenge_id = challenge_id,
            identity = identity,
            "Expired instance deleted"
        );
        Ok(true)
    }
}

fn mode_from_config(config: &JanitorConfig) -> Result<Mode> {
    match &config.cron {
        Some(expression) => {
            let schedule = cron::Schedule::from_str(expression).map_err(|e| {
                Error::InvalidRequest(format!("invalid janitor cron expression: {e}"))
            })?;
            Ok(Mode::Cron(Box::new(schedule)))
        }
        None => Ok(Mode::Ticker(config.ticker)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Sweeps are covered by the integration tests; only mode resolution is
    // exercised here.

    #[test]
    fn test_mode_from_config_ticker() {
        let config = JanitorConfig {
            ticker: Duration::from_secs(60),
            cron: None,
        };
        match mode_from_config(&config).unwrap() {
            Mode::Ticker(interval) => assert_eq!(interval, Duration::from_secs(60)),
            Mode::Cron(_) => panic!("expected ticker mode"),
        }
    }

    #[test]
    fn test_mode_from_config_cron() {
        let config = JanitorConfig {
            ticker: Duration::from_secs(60),
            cron: Some("0 */5 * * * *".to_string()),
        };
        match mode_from_config(&config).unwrap() {
            Mode::Cron(_) => {}
            Mode::Ticker(_) => panic!("expected cron mode"),
        }
    }

    #[test]
    fn test_mode_from_config_invalid_cron() {
        let config = JanitorConfig {
            ticker: Duration::from_secs(60),
            cron: Some("not a cron expression".to_string()),
        };
        assert!(matches!(
            mode_from_config(&config),
            Err(Error::InvalidRequest(_))
        ));
    }
}
