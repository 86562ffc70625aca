// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Janitor expiry behavior.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use flagforge_scenario::engine::mock::MockEngine;
use flagforge_server::janitor::{Janitor, Mode};
use flagforge_server::{Error, challenge, instance};

use common::{challenge_params, setup, setup_with_engine};

#[tokio::test]
async fn test_sweep_deletes_expired_instance() {
    let env = setup();
    let mut params = challenge_params(&env, "c1");
    // Zero lifetime: the instance is expired the moment it exists.
    params.timeout = Some(0);
    challenge::create_challenge(&env.state, params, None).await.unwrap();
    instance::create_instance(&env.state, "c1", "u1", BTreeMap::new(), None)
        .await
        .unwrap();

    let janitor = Janitor::new(env.state.clone(), Mode::Ticker(Duration::from_secs(1)));
    let (deleted, failed) = janitor.sweep().await;

    assert_eq!(deleted, 1);
    assert_eq!(failed, 0);
    assert!(matches!(
        instance::retrieve_instance(&env.state, "c1", "u1").await,
        Err(Error::InstanceNotFound { .. })
    ));
    assert_eq!(env.engine.down_calls(), 1);
}

#[tokio::test]
async fn test_sweep_keeps_live_instances() {
    let env = setup();
    let mut params = challenge_params(&env, "c1");
    params.timeout = Some(3600);
    challenge::create_challenge(&env.state, params, None).await.unwrap();
    instance::create_instance(&env.state, "c1", "u1", BTreeMap::new(), None)
        .await
        .unwrap();

    // An instance with no expiry at all, on a second challenge.
    challenge::create_challenge(&env.state, challenge_params(&env, "c2"), None)
        .await
        .unwrap();
    instance::create_instance(&env.state, "c2", "u1", BTreeMap::new(), None)
        .await
        .unwrap();

    let janitor = Janitor::new(env.state.clone(), Mode::Ticker(Duration::from_secs(1)));
    let (deleted, failed) = janitor.sweep().await;

    assert_eq!(deleted, 0);
    assert_eq!(failed, 0);
    assert!(instance::retrieve_instance(&env.state, "c1", "u1").await.is_ok());
    assert!(instance::retrieve_instance(&env.state, "c2", "u1").await.is_ok());
}

#[tokio::test]
async fn test_sweep_failure_leaves_record_for_retry() {
    let env = setup_with_engine(MockEngine::failing_down());
    let mut params = challenge_params(&env, "c1");
    params.timeout = Some(0);
    challenge::create_challenge(&env.state, params, None).await.unwrap();
    instance::create_instance(&env.state, "c1", "u1", BTreeMap::new(), None)
        .await
        .unwrap();

    let janitor = Janitor::new(env.state.clone(), Mode::Ticker(Duration::from_secs(1)));
    let (deleted, failed) = janitor.sweep().await;

    assert_eq!(deleted, 0);
    assert_eq!(failed, 1);
    // The record survives; the next sweep retries.
    assert!(instance::retrieve_instance(&env.state, "c1", "u1").await.is_ok());

    let (_, failed_again) = janitor.sweep().await;
    assert_eq!(failed_again, 1);
}

#[tokio::test]
async fn test_sweep_on_empty_store() {
    let env = setup();
    let janitor = Janitor::new(env.state.clone(), Mode::Ticker(Duration::from_secs(1)));
    let (deleted, failed) = janitor.sweep().await;
    assert_eq!((deleted, failed), (0, 0));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ticker_loop_expires_within_two_ticks() {
    let env = setup();
    let mut params = challenge_params(&env, "c1");
    params.timeout = Some(0);
    challenge::create_challenge(&env.state, params, None).await.unwrap();
    instance::create_instance(&env.state, "c1", "u1", BTreeMap::new(), None)
        .await
        .unwrap();

    let janitor = Arc::new(Janitor::new(
        env.state.clone(),
        Mode::Ticker(Duration::from_millis(100)),
    ));
    let shutdown = janitor.shutdown_handle();
    let handle = {
        let janitor = janitor.clone();
        tokio::spawn(async move { janitor.run().await })
    };

    // Two ticks plus slack.
    tokio::time::sleep(Duration::from_millis(350)).await;

    assert!(matches!(
        instance::retrieve_instance(&env.state, "c1", "u1").await,
        Err(Error::InstanceNotFound { .. })
    ));

    shutdown.notify_one();
    handle.await.unwrap();
}
