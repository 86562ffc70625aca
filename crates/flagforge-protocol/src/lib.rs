// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! gRPC wire contract for flagforge.
//!
//! Three services map onto the orchestration layers:
//! - `ChallengeService`: challenge CRUD plus a streaming query
//! - `InstanceService`: instance CRUD, renewal, streaming query
//! - `InfoService`: version and liveness
//!
//! [`v1`] holds the generated bindings; [`convert`] bridges store records to
//! wire messages.

/// Generated gRPC bindings.
#[allow(clippy::all)]
pub mod v1 {
    tonic::include_proto!("flagforge.v1");
}

pub mod convert;

pub use v1::challenge_service_client::ChallengeServiceClient;
pub use v1::challenge_service_server::{ChallengeService, ChallengeServiceServer};
pub use v1::info_service_client::InfoServiceClient;
pub use v1::info_service_server::{InfoService, InfoServiceServer};
pub use v1::instance_service_client::InstanceServiceClient;
pub use v1::instance_service_server::{InstanceService, InstanceServiceServer};
