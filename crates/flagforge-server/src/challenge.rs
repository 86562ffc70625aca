// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Challenge lifecycle handlers.
//!
//! Challenge mutations hold the challenge lock for their whole duration, so
//! they serialize against every instance operation of that challenge. The
//! update fan-out and the delete cascade additionally take each instance
//! lock in turn, honoring the lock ordering rule.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{info, warn};

use flagforge_core::store::{Challenge, StoreError};
use flagforge_scenario::{Project, dir_digest, validate};

use crate::error::{Error, Result};
use crate::instance;
use crate::state::AppState;

/// Inputs for challenge registration.
#[derive(Debug, Default)]
pub struct CreateChallengeParams {
    /// Unique challenge identifier.
    pub id: String,
    /// Scenario reference (ignored when `archive` is given).
    pub scenario: String,
    /// Inline tar.gz scenario archive.
    pub archive: Option<Vec<u8>>,
    /// Default expiry inherited by new instances.
    pub until: Option<DateTime<Utc>>,
    /// Default instance lifetime in seconds.
    pub timeout: Option<u64>,
    /// Advisory lower bound on instance count.
    pub min: Option<u32>,
    /// Upper bound on instance count.
    pub max: Option<u32>,
    /// Extra configuration forwarded to the scenario.
    pub additional: BTreeMap<String, String>,
    /// Image pull secret names forwarded to the scenario.
    pub image_pull_secrets: Vec<String>,
}

/// Delta for a challenge update. `None` fields keep their current value.
#[derive(Debug, Default)]
pub struct UpdateChallengeParams {
    /// Challenge to update.
    pub id: String,
    /// New scenario reference.
    pub scenario: Option<String>,
    /// Inline tar.gz scenario archive; takes precedence over `scenario`.
    pub archive: Option<Vec<u8>>,
    /// New default expiry.
    pub until: Option<DateTime<Utc>>,
    /// New default lifetime in seconds.
    pub timeout: Option<u64>,
    /// New lower bound.
    pub min: Option<u32>,
    /// New upper bound.
    pub max: Option<u32>,
    /// Replacement `additional` map.
    pub additional: Option<BTreeMap<String, String>>,
    /// Replacement image pull secret list.
    pub image_pull_secrets: Option<Vec<String>>,
}

/// Register a challenge.
///
/// The scenario is resolved and validated (dry-run with a throwaway
/// identity) before anything is persisted: on failure, no record exists.
pub async fn create_challenge(
    state: &AppState,
    params: CreateChallengeParams,
    deadline: Option<Instant>,
) -> Result<Challenge> {
    if params.id.is_empty() {
        return Err(Error::InvalidRequest("challenge id must not be empty".to_string()));
    }

    let _lc = state.locks.lock_challenge(&params.id, deadline).await?;

    if state.store.challenge_exists(&params.id).await? {
        return Err(Error::ChallengeExists(params.id));
    }

    let (scenario, workdir) =
        resolve_scenario(state, &params.scenario, params.archive.as_deref()).await?;
    let hash = dir_digest(&workdir)?;

    let project = Project::load(&workdir)?;
    validate::validate(
        state.engine.as_ref(),
        &workdir,
        &project.name,
        &params.id,
        &params.image_pull_secrets,
        &params.additional,
    )
    .await?;

    let challenge = Challenge {
        id: params.id,
        scenario,
        hash,
        until: params.until,
        timeout: params.timeout,
        min: params.min,
        max: params.max,
        additional: params.additional,
        image_pull_secrets: params.image_pull_secrets,
    };
    state.store.write_challenge(&challenge).await?;

    info!(challenge_id = %challenge.id, scenario = %challenge.scenario, "Challenge created");
    Ok(challenge)
}

/// Load a challenge record. No lock is taken.
pub async fn retrieve_challenge(state: &AppState, challenge_id: &str) -> Result<Challenge> {
    match state.store.read_challenge(challenge_id).await {
        Ok(challenge) => Ok(challenge),
        Err(StoreError::NotFound(_)) => Err(Error::ChallengeNotFound(challenge_id.to_string())),
        Err(e) => Err(e.into()),
    }
}

/// Apply a delta to a challenge and re-deploy its live instances.
///
/// When the scenario changes, it is re-validated before the record is
/// persisted. The fan-out then re-runs every instance stack so the new
/// scenario and configuration take effect. Instances that fail are reported
/// as a partial update; the ones already updated are not rolled back.
pub async fn update_challenge(
    state: &AppState,
    params: UpdateChallengeParams,
    deadline: Option<Instant>,
) -> Result<Challenge> {
    let _lc = state.locks.lock_challenge(&params.id, deadline).await?;

    let mut challenge = match state.store.read_challenge(&params.id).await {
        Ok(challenge) => challenge,
        Err(StoreError::NotFound(_)) => {
            return Err(Error::ChallengeNotFound(params.id));
        }
        Err(e) => return Err(e.into()),
    };

    // Resolve the (possibly new) scenario to a working directory.
    let mut scenario_changed = false;
    let mut scenario_dir: Option<PathBuf> = None;
    if params.archive.is_some() || params.scenario.is_some() {
        let reference = params.scenario.as_deref().unwrap_or(&challenge.scenario);
        if params.archive.is_none() {
            // A re-sent reference may point at moved content (e.g. a tag
            // that advanced); drop the cache entry so it is fetched again.
            state.cache.invalidate(reference).await?;
        }
        let (scenario, dir) =
            resolve_scenario(state, reference, params.archive.as_deref()).await?;
        let hash = dir_digest(&dir)?;
        if hash != challenge.hash || scenario != challenge.scenario {
            scenario_changed = true;
        }
        challenge.scenario = scenario;
        challenge.hash = hash;
        scenario_dir = Some(dir);
    }

    if let Some(until) = params.until {
        challenge.until = Some(until);
    }
    if let Some(timeout) = params.timeout {
        challenge.timeout = Some(timeout);
    }
    if let Some(min) = params.min {
        challenge.min = Some(min);
    }
    if let Some(max) = params.max {
        challenge.max = Some(max);
    }
    if let Some(additional) = params.additional {
        challenge.additional = additional;
    }
    if let Some(secrets) = params.image_pull_secrets {
        challenge.image_pull_secrets = secrets;
    }

    if scenario_changed
        && let Some(workdir) = &scenario_dir
    {
        let project = Project::load(workdir)?;
        validate::validate(
            state.engine.as_ref(),
            workdir,
            &project.name,
            &challenge.id,
            &challenge.image_pull_secrets,
            &challenge.additional,
        )
        .await?;
    }

    state.store.write_challenge(&challenge).await?;

    // Fan out to live instances so the new scenario/config takes effect.
    let identities = state.store.list_instances(&challenge.id).await?;
    let total = identities.len();
    let mut failures = Vec::new();
    for identity in identities {
        let source_id = match state.store.read_instance(&challenge.id, &identity).await {
            Ok(instance) => instance.source_id,
            Err(StoreError::NotFound(_)) => continue, // deleted under us
            Err(e) => {
                warn!(identity = %identity, error = %e, "Skipping unreadable instance");
                failures.push(identity);
                continue;
            }
        };

        let _li = state.locks.lock_instance(&challenge.id, &source_id, deadline).await?;
        // Re-read under the lock; the record may have changed while we
        // were updating a sibling.
        let mut instance = match state.store.read_instance(&challenge.id, &identity).await {
            Ok(instance) => instance,
            Err(StoreError::NotFound(_)) => continue,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Skipping unreadable instance");
                failures.push(identity);
                continue;
            }
        };

        let result = async {
            let workdir =
                instance::materialize_workdir(state, &challenge, &instance.identity).await?;
            instance::redeploy(state, &challenge, &mut instance, &workdir).await
        }
        .await;
        if let Err(e) = result {
            warn!(
                challenge_id = %challenge.id,
                identity = %identity,
                error = %e,
                "Instance re-deploy failed during challenge update"
            );
            failures.push(identity);
        }
    }

    if !failures.is_empty() {
        return Err(Error::PartialUpdate {
            total,
            identities: failures,
        });
    }

    info!(challenge_id = %challenge.id, instances = total, "Challenge updated");
    Ok(challenge)
}

/// Delete a challenge and cascade to its instances.
///
/// Every instance is destroyed under its own lock. If any survives, the
/// challenge record is kept so a retry can finish the job; success means no
/// instance directory remains.
pub async fn delete_challenge(
    state: &AppState,
    challenge_id: &str,
    deadline: Option<Instant>,
) -> Result<()> {
    let _lc = state.locks.lock_challenge(challenge_id, deadline).await?;

    let challenge = match state.store.read_challenge(challenge_id).await {
        Ok(challenge) => challenge,
        Err(StoreError::NotFound(_)) => {
            return Err(Error::ChallengeNotFound(challenge_id.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    let identities = state.store.list_instances(challenge_id).await?;
    let total = identities.len();
    let mut failures = Vec::new();
    for identity in identities {
        let instance = match state.store.read_instance(challenge_id, &identity).await {
            Ok(instance) => instance,
            Err(StoreError::NotFound(_)) => continue,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Skipping unreadable instance");
                failures.push(identity);
                continue;
            }
        };

        let _li = state
            .locks
            .lock_instance(challenge_id, &instance.source_id, deadline)
            .await?;
        if let Err(e) = instance::destroy(state, &challenge, &instance).await {
            warn!(
                challenge_id = challenge_id,
                identity = %identity,
                error = %e,
                "Instance delete failed during challenge delete"
            );
            failures.push(identity);
        }
    }

    if !failures.is_empty() {
        return Err(Error::PartialDelete {
            total,
            identities: failures,
        });
    }

    state.store.delete_challenge_dir(challenge_id).await?;
    info!(challenge_id = challenge_id, "Challenge deleted");
    Ok(())
}

/// Resolve a scenario input to a `(reference, workdir)` pair.
///
/// Inline archives are materialized in the cache and recorded by their
/// working directory, so later loads resolve as a local directory.
async fn resolve_scenario(
    state: &AppState,
    scenario: &str,
    archive: Option<&[u8]>,
) -> Result<(String, PathBuf)> {
    if let Some(bytes) = archive {
        let dir = state.cache.store_archive(bytes).await?;
        return Ok((dir.display().to_string(), dir));
    }
    if scenario.is_empty() {
        return Err(Error::InvalidRequest(
            "either a scenario reference or an archive is required".to_string(),
        ));
    }
    let dir = state.cache.load(scenario).await?;
    Ok((scenario.to_string(), dir))
}
