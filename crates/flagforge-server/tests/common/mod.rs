// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for integration tests.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use flagforge_core::config::OciConfig;
use flagforge_core::lock::LockService;
use flagforge_core::store::FsStore;
use flagforge_scenario::ScenarioCache;
use flagforge_scenario::engine::Engine;
use flagforge_scenario::engine::mock::MockEngine;
use flagforge_server::AppState;
use flagforge_server::challenge::CreateChallengeParams;

/// One test environment: temp store, temp cache, local locks, mock engine,
/// and a scenario directory with a valid descriptor.
pub struct TestEnv {
    /// Keeps the temp tree alive for the duration of the test.
    pub tmp: TempDir,
    pub state: Arc<AppState>,
    pub engine: Arc<MockEngine>,
    pub scenario_dir: PathBuf,
}

/// Set up a test environment with a default mock engine.
pub fn setup() -> TestEnv {
    setup_with_engine(MockEngine::new())
}

/// Set up a test environment with a caller-configured mock engine.
pub fn setup_with_engine(engine: MockEngine) -> TestEnv {
    let tmp = TempDir::new().unwrap();

    let scenario_dir = tmp.path().join("scenario");
    std::fs::create_dir_all(&scenario_dir).unwrap();
    std::fs::write(
        scenario_dir.join("Pulumi.yaml"),
        "name: test-chall\nruntime: go\n",
    )
    .unwrap();

    let store = FsStore::new(tmp.path().join("store"));
    let cache = ScenarioCache::new(tmp.path().join("cache"), &OciConfig::default()).unwrap();
    let engine = Arc::new(engine);
    let dyn_engine: Arc<dyn Engine> = engine.clone();
    let state = Arc::new(AppState::new(
        store,
        LockService::local(),
        cache,
        dyn_engine,
    ));

    TestEnv {
        tmp,
        state,
        engine,
        scenario_dir,
    }
}

/// Parameters registering `id` against the fixture scenario directory.
pub fn challenge_params(env: &TestEnv, id: &str) -> CreateChallengeParams {
    CreateChallengeParams {
        id: id.to_string(),
        scenario: env.scenario_dir.display().to_string(),
        ..Default::default()
    }
}
