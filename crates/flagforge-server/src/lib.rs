// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! flagforge server: challenge and instance orchestration over a scenario
//! engine, plus the janitor and the gRPC surface.
//!
//! Layering, bottom to top:
//! - [`state`]: shared handler state (store, locks, cache, engine)
//! - [`challenge`] / [`instance`]: lock-guarded orchestration handlers
//! - [`janitor`]: background expiry of instances past their `until`
//! - [`services`]: gRPC bindings over the handlers
//! - [`runtime`]: wires everything together for `main`

pub mod challenge;
pub mod error;
pub mod instance;
pub mod janitor;
pub mod runtime;
pub mod services;
pub mod state;

pub use error::{Error, Result};
pub use state::AppState;
