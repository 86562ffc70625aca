// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Concurrency guarantees: same-identity operations serialize, distinct
//! identities do not interfere.

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use flagforge_core::lock::LockError;
use flagforge_scenario::engine::mock::MockEngine;
use flagforge_server::{Error, challenge, instance};

use common::{challenge_params, setup_with_engine};

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_create_same_identity_one_wins() {
    let env = setup_with_engine(MockEngine::with_delay(50));
    challenge::create_challenge(&env.state, challenge_params(&env, "c1"), None)
        .await
        .unwrap();

    let a = {
        let state = env.state.clone();
        tokio::spawn(async move {
            instance::create_instance(&state, "c1", "u1", BTreeMap::new(), None).await
        })
    };
    let b = {
        let state = env.state.clone();
        tokio::spawn(async move {
            instance::create_instance(&state, "c1", "u1", BTreeMap::new(), None).await
        })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    let already_exists = results
        .iter()
        .filter(|r| matches!(r, Err(Error::InstanceExists { .. })))
        .count();

    assert_eq!(successes, 1);
    assert_eq!(already_exists, 1);
    // The loser never reached the engine: exactly one deployment ran.
    assert_eq!(env.engine.up_calls(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_same_instance_operations_never_overlap_engine_calls() {
    let env = setup_with_engine(MockEngine::with_delay(30));
    challenge::create_challenge(&env.state, challenge_params(&env, "c1"), None)
        .await
        .unwrap();
    instance::create_instance(&env.state, "c1", "u1", BTreeMap::new(), None)
        .await
        .unwrap();

    // Hammer the same instance with parallel updates; the locks must
    // serialize every engine call.
    let mut handles = Vec::new();
    for _ in 0..5 {
        let state = env.state.clone();
        handles.push(tokio::spawn(async move {
            instance::update_instance(&state, "c1", "u1", None, None).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(env.engine.max_concurrent_ups(), 1);
    assert_eq!(env.engine.up_calls(), 6); // 1 create + 5 updates
}

#[tokio::test(flavor = "multi_thread")]
async fn test_distinct_sources_create_concurrently() {
    let env = setup_with_engine(MockEngine::with_delay(20));
    // Two challenges so the creates do not serialize on one challenge lock.
    challenge::create_challenge(&env.state, challenge_params(&env, "c1"), None)
        .await
        .unwrap();
    challenge::create_challenge(&env.state, challenge_params(&env, "c2"), None)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for (challenge_id, source_id) in [("c1", "u1"), ("c1", "u2"), ("c2", "u1"), ("c2", "u2")] {
        let state = env.state.clone();
        handles.push(tokio::spawn(async move {
            instance::create_instance(&state, challenge_id, source_id, BTreeMap::new(), None).await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(env.engine.up_calls(), 4);

    // Identities are all distinct.
    let mut identities: Vec<String> = Vec::new();
    for (challenge_id, source_id) in [("c1", "u1"), ("c1", "u2"), ("c2", "u1"), ("c2", "u2")] {
        let inst = instance::retrieve_instance(&env.state, challenge_id, source_id)
            .await
            .unwrap();
        identities.push(inst.identity);
    }
    identities.sort();
    identities.dedup();
    assert_eq!(identities.len(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deadline_expires_while_challenge_lock_held() {
    let env = setup_with_engine(MockEngine::new());
    challenge::create_challenge(&env.state, challenge_params(&env, "c1"), None)
        .await
        .unwrap();

    // Hold the challenge lock, as a long-running operation would.
    let held = env.state.locks.lock_challenge("c1", None).await.unwrap();

    let deadline = Some(Instant::now() + Duration::from_millis(50));
    let result =
        instance::create_instance(&env.state, "c1", "u1", BTreeMap::new(), deadline).await;
    assert!(matches!(result, Err(Error::Lock(LockError::Cancelled))));

    // The deadline expired before any engine work started.
    assert_eq!(env.engine.up_calls(), 0);

    held.release().await.unwrap();

    // With the lock free again, the same call goes through.
    instance::create_instance(&env.state, "c1", "u1", BTreeMap::new(), None)
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delete_races_create_cleanly() {
    let env = setup_with_engine(MockEngine::with_delay(20));
    challenge::create_challenge(&env.state, challenge_params(&env, "c1"), None)
        .await
        .unwrap();

    let create = {
        let state = env.state.clone();
        tokio::spawn(async move {
            instance::create_instance(&state, "c1", "u1", BTreeMap::new(), None).await
        })
    };
    let delete = {
        let state = env.state.clone();
        tokio::spawn(
            async move { instance::delete_instance(&state, "c1", "u1", None).await },
        )
    };

    let create_result = create.await.unwrap();
    let delete_result = delete.await.unwrap();

    // Whichever order the locks granted, the outcome is coherent: either
    // the delete found nothing (create ran second or not yet), or it
    // removed the created instance.
    match delete_result {
        Ok(()) => {
            assert!(create_result.is_ok());
            assert!(matches!(
                instance::retrieve_instance(&env.state, "c1", "u1").await,
                Err(Error::InstanceNotFound { .. })
            ));
        }
        Err(Error::InstanceNotFound { .. }) => {
            assert!(create_result.is_ok());
            assert!(instance::retrieve_instance(&env.state, "c1", "u1").await.is_ok());
        }
        Err(other) => panic!("unexpected delete outcome: {other}"),
    }
}
