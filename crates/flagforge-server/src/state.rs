// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared handler state.

use std::sync::Arc;

use flagforge_core::lock::LockService;
use flagforge_core::store::FsStore;
use flagforge_scenario::ScenarioCache;
use flagforge_scenario::engine::Engine;

/// State shared across all handlers, the janitor, and the gRPC services.
pub struct AppState {
    /// Filesystem store for challenge and instance records.
    pub store: FsStore,
    /// Named lock service serializing mutations.
    pub locks: LockService,
    /// Scenario cache resolving references to working directories.
    pub cache: ScenarioCache,
    /// Infrastructure engine adapter.
    pub engine: Arc<dyn Engine>,
    /// Server version string.
    pub version: String,
    /// When the server started (for uptime reporting).
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Create handler state.
    pub fn new(
        store: FsStore,
        locks: LockService,
        cache: ScenarioCache,
        engine: Arc<dyn Engine>,
    ) -> Self {
        Self {
            store,
            locks,
            cache,
            engine,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }
}
