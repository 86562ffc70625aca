// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance lifecycle handlers.
//!
//! Every mutating operation takes the challenge lock, then the instance
//! lock, in that order. Reads take no lock: records are written atomically,
//! so a reader sees either the previous or the next version, never a torn
//! one.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use tokio::time::Instant;
use tracing::{info, warn};

use flagforge_core::compute_identity;
use flagforge_core::store::{Challenge, Instance, StoreError};
use flagforge_scenario::engine::StackHandle;
use flagforge_scenario::{Project, ScenarioOutputs, StackConfig};

use crate::error::{Error, Result};
use crate::state::AppState;

/// Create an instance of `challenge_id` for `source_id`.
///
/// Exactly one of two concurrent creates for the same pair succeeds; the
/// other observes the record under the instance lock and fails with
/// already-exists.
pub async fn create_instance(
    state: &AppState,
    challenge_id: &str,
    source_id: &str,
    additional: BTreeMap<String, String>,
    deadline: Option<Instant>,
) -> Result<Instance> {
    if challenge_id.is_empty() || source_id.is_empty() {
        return Err(Error::InvalidRequest(
            "challenge_id and source_id must not be empty".to_string(),
        ));
    }

    let _lc = state.locks.lock_challenge(challenge_id, deadline).await?;
    let challenge = read_challenge_for_instance_op(state, challenge_id).await?;

    let _li = state.locks.lock_instance(challenge_id, source_id, deadline).await?;
    let identity = compute_identity(challenge_id, source_id);

    if state.store.instance_exists(challenge_id, &identity).await? {
        return Err(Error::InstanceExists {
            challenge_id: challenge_id.to_string(),
            source_id: source_id.to_string(),
        });
    }

    if let Some(max) = challenge.max {
        let count = state.store.list_instances(challenge_id).await?.len();
        if count >= max as usize {
            return Err(Error::InstanceLimit {
                challenge_id: challenge_id.to_string(),
                max,
            });
        }
    }

    // Everything below owns an instance directory (the scenario working
    // copy at least), so every failure path removes it again.
    let workdir = materialize_workdir(state, &challenge, &identity).await?;

    let prepared: Result<StackHandle> = async {
        let project = Project::load(&workdir)?;
        let stack = state
            .engine
            .load(&workdir, &project.name, &identity)
            .await?;
        let config = StackConfig::merged(
            &identity,
            challenge_id,
            &challenge.image_pull_secrets,
            &challenge.additional,
            &additional,
        );
        state.engine.set_config(&stack, &config).await?;
        Ok(stack)
    }
    .await;
    let stack = match prepared {
        Ok(stack) => stack,
        Err(e) => {
            let _ = state
                .store
                .delete_instance_dir(challenge_id, &identity)
                .await;
            return Err(e);
        }
    };

    let outputs = match state.engine.up(&stack).await {
        Ok(outputs) => outputs,
        Err(e) => {
            // `up` may have created resources before failing.
            teardown_best_effort(state, &stack).await;
            let _ = state
                .store
                .delete_instance_dir(challenge_id, &identity)
                .await;
            return Err(e.into());
        }
    };

    // Anything failing from here on leaves real infrastructure behind, so
    // tear it down and surface the original error.
    let result: Result<Instance> = async {
        let parsed = ScenarioOutputs::parse(&outputs)?;
        let deployment = state.engine.export(&stack).await?;

        let now = Utc::now();
        let instance = Instance {
            identity: identity.clone(),
            challenge_id: challenge_id.to_string(),
            source_id: source_id.to_string(),
            since: now,
            last_renew: now,
            until: compute_until(now, challenge.timeout, challenge.until),
            connection_info: parsed.connection_info,
            flags: parsed.flags,
            additional,
        };

        state
            .store
            .write_state(challenge_id, &identity, &deployment)
            .await?;
        state.store.write_instance(&instance).await?;
        Ok(instance)
    }
    .await;

    match result {
        Ok(instance) => {
            info!(
                challenge_id = challenge_id,
                source_id = source_id,
                identity = %instance.identity,
                "Instance created"
            );
            Ok(instance)
        }
        Err(e) => {
            teardown_best_effort(state, &stack).await;
            let _ = state
                .store
                .delete_instance_dir(challenge_id, &identity)
                .await;
            Err(e)
        }
    }
}

/// Load an instance record. No lock is taken.
pub async fn retrieve_instance(
    state: &AppState,
    challenge_id: &str,
    source_id: &str,
) -> Result<Instance> {
    let identity = compute_identity(challenge_id, source_id);
    match state.store.read_instance(challenge_id, &identity).await {
        Ok(instance) => Ok(instance),
        Err(StoreError::NotFound(_)) => Err(Error::InstanceNotFound {
            challenge_id: challenge_id.to_string(),
            source_id: source_id.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Re-deploy an instance, optionally replacing its `additional` overrides.
pub async fn update_instance(
    state: &AppState,
    challenge_id: &str,
    source_id: &str,
    additional: Option<BTreeMap<String, String>>,
    deadline: Option<Instant>,
) -> Result<Instance> {
    let _lc = state.locks.lock_challenge(challenge_id, deadline).await?;
    let challenge = read_challenge_for_instance_op(state, challenge_id).await?;

    let _li = state.locks.lock_instance(challenge_id, source_id, deadline).await?;
    let identity = compute_identity(challenge_id, source_id);
    let mut instance = match state.store.read_instance(challenge_id, &identity).await {
        Ok(instance) => instance,
        Err(StoreError::NotFound(_)) => {
            return Err(Error::InstanceNotFound {
                challenge_id: challenge_id.to_string(),
                source_id: source_id.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(additional) = additional {
        instance.additional = additional;
    }

    let workdir = materialize_workdir(state, &challenge, &identity).await?;
    redeploy(state, &challenge, &mut instance, &workdir).await?;

    info!(
        challenge_id = challenge_id,
        identity = %instance.identity,
        "Instance updated"
    );
    Ok(instance)
}

/// Extend an instance's lifetime. Touches no infrastructure.
pub async fn renew_instance(
    state: &AppState,
    challenge_id: &str,
    source_id: &str,
    deadline: Option<Instant>,
) -> Result<Instance> {
    let _lc = state.locks.lock_challenge(challenge_id, deadline).await?;
    let challenge = read_challenge_for_instance_op(state, challenge_id).await?;

    let Some(timeout) = challenge.timeout else {
        return Err(Error::RenewWithoutTimeout(challenge_id.to_string()));
    };

    let _li = state.locks.lock_instance(challenge_id, source_id, deadline).await?;
    let identity = compute_identity(challenge_id, source_id);
    let mut instance = match state.store.read_instance(challenge_id, &identity).await {
        Ok(instance) => instance,
        Err(StoreError::NotFound(_)) => {
            return Err(Error::InstanceNotFound {
                challenge_id: challenge_id.to_string(),
                source_id: source_id.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let now = Utc::now();
    instance.last_renew = now;
    instance.until = Some(now + Duration::seconds(timeout as i64));
    state.store.write_instance(&instance).await?;

    info!(
        challenge_id = challenge_id,
        identity = %instance.identity,
        until = ?instance.until,
        "Instance renewed"
    );
    Ok(instance)
}

/// Destroy an instance and remove its record.
pub async fn delete_instance(
    state: &AppState,
    challenge_id: &str,
    source_id: &str,
    deadline: Option<Instant>,
) -> Result<()> {
    let _lc = state.locks.lock_challenge(challenge_id, deadline).await?;
    let challenge = read_challenge_for_instance_op(state, challenge_id).await?;

    let _li = state.locks.lock_instance(challenge_id, source_id, deadline).await?;
    let identity = compute_identity(challenge_id, source_id);
    let instance = match state.store.read_instance(challenge_id, &identity).await {
        Ok(instance) => instance,
        Err(StoreError::NotFound(_)) => {
            return Err(Error::InstanceNotFound {
                challenge_id: challenge_id.to_string(),
                source_id: source_id.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    destroy(state, &challenge, &instance).await
}

/// Re-run the stack for an existing instance and persist the refreshed
/// record. Shared between [`update_instance`] and the challenge update
/// fan-out; the caller holds both locks.
pub(crate) async fn redeploy(
    state: &AppState,
    challenge: &Challenge,
    instance: &mut Instance,
    workdir: &Path,
) -> Result<()> {
    let project = Project::load(workdir)?;
    let stack = state
        .engine
        .load(workdir, &project.name, &instance.identity)
        .await?;

    match state
        .store
        .read_state(&instance.challenge_id, &instance.identity)
        .await
    {
        Ok(deployment) => state.engine.import(&stack, &deployment).await?,
        Err(StoreError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let config = StackConfig::merged(
        &instance.identity,
        &instance.challenge_id,
        &challenge.image_pull_secrets,
        &challenge.additional,
        &instance.additional,
    );
    state.engine.set_config(&stack, &config).await?;

    let outputs = state.engine.up(&stack).await?;
    let parsed = ScenarioOutputs::parse(&outputs)?;
    instance.connection_info = parsed.connection_info;
    instance.flags = parsed.flags;

    let deployment = state.engine.export(&stack).await?;
    state
        .store
        .write_state(&instance.challenge_id, &instance.identity, &deployment)
        .await?;
    state.store.write_instance(instance).await?;
    Ok(())
}

/// Tear an instance down and remove its directory, record last.
///
/// A crash or engine failure mid-way leaves the record in place, pointing at
/// partially cleaned infrastructure; the next attempt (client retry or
/// janitor tick) goes through the same path, which is idempotent.
pub(crate) async fn destroy(
    state: &AppState,
    challenge: &Challenge,
    instance: &Instance,
) -> Result<()> {
    let workdir = materialize_workdir(state, challenge, &instance.identity).await?;
    let project = Project::load(&workdir)?;
    let stack = state
        .engine
        .load(&workdir, &project.name, &instance.identity)
        .await?;

    match state
        .store
        .read_state(&instance.challenge_id, &instance.identity)
        .await
    {
        Ok(deployment) => state.engine.import(&stack, &deployment).await?,
        Err(StoreError::NotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    state.engine.down(&stack).await?;

    state
        .store
        .delete_instance_dir(&instance.challenge_id, &instance.identity)
        .await?;

    info!(
        challenge_id = %instance.challenge_id,
        identity = %instance.identity,
        "Instance deleted"
    );
    Ok(())
}

/// Materialize the per-instance scenario working copy under the instance's
/// state directory.
///
/// The cache copy is shared and read-only; the engine runs over a private
/// copy so stack operations can scribble in their working directory. The
/// copy is refreshed from the cache on every call. If the cached source is
/// gone (say, a local scenario directory was removed after registration), an
/// existing working copy is reused so teardown can still proceed.
pub(crate) async fn materialize_workdir(
    state: &AppState,
    challenge: &Challenge,
    identity: &str,
) -> Result<std::path::PathBuf> {
    let dst = state.store.scenario_dir(&challenge.id, identity)?;

    let src = match state.cache.load(&challenge.scenario).await {
        Ok(src) => src,
        Err(e) if dst.is_dir() => {
            warn!(
                challenge_id = %challenge.id,
                identity = identity,
                error = %e,
                "Scenario source unavailable, reusing existing working copy"
            );
            return Ok(dst);
        }
        Err(e) => return Err(e.into()),
    };

    let dst_clone = dst.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        match std::fs::remove_dir_all(&dst_clone) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        copy_dir_all(&src, &dst_clone)
    })
    .await
    .map_err(|e| Error::Store(StoreError::Io(std::io::Error::other(e))))?
    .map_err(StoreError::Io)?;

    Ok(dst)
}

fn copy_dir_all(src: &std::path::Path, dst: &std::path::Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &to)?;
        } else {
            std::fs::copy(entry.path(), &to)?;
        }
    }
    Ok(())
}

async fn teardown_best_effort(state: &AppState, stack: &StackHandle) {
    if let Err(e) = state.engine.down(stack).await {
        warn!(
            identity = %stack.identity,
            error = %e,
            "Best-effort teardown failed, resources may be left behind"
        );
    }
}

async fn read_challenge_for_instance_op(
    state: &AppState,
    challenge_id: &str,
) -> Result<Challenge> {
    match state.store.read_challenge(challenge_id).await {
        Ok(challenge) => Ok(challenge),
        Err(StoreError::NotFound(_)) => Err(Error::UnknownChallenge(challenge_id.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Expiry for a new instance: the sooner of `since + timeout` and the
/// challenge-wide `until`.
fn compute_until(
    since: DateTime<Utc>,
    timeout: Option<u64>,
    challenge_until: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let from_timeout = timeout.map(|t| since + Duration::seconds(t as i64));
    match (from_timeout, challenge_until) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}
