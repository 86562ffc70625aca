// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! gRPC service implementations.
//!
//! Thin bindings from the wire contract to the handlers in
//! [`challenge`](crate::challenge) and [`instance`](crate::instance);
//! [`status`] holds the single error-to-status mapping.
//!
//! Every mutating RPC derives a lock-acquisition deadline from the
//! client's `grpc-timeout` metadata (tonic does not apply it server-side),
//! so a caller that stops waiting stops queueing on the locks.

pub mod challenge;
pub mod info;
pub mod instance;
pub mod status;

pub use challenge::ChallengeGrpc;
pub use info::InfoGrpc;
pub use instance::InstanceGrpc;

use std::time::Duration;

use tokio::time::Instant;
use tonic::Request;

/// Deadline implied by the request's `grpc-timeout` metadata, if any.
///
/// The header value is an integer with a unit suffix (`H`, `M`, `S`, `m`,
/// `u`, `n`); malformed values are treated as no deadline.
pub(crate) fn request_deadline<T>(request: &Request<T>) -> Option<Instant> {
    let value = request.metadata().get("grpc-timeout")?.to_str().ok()?;
    Some(Instant::now() + parse_grpc_timeout(value)?)
}

fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    match unit {
        "H" => Some(Duration::from_secs(amount.checked_mul(3600)?)),
        "M" => Some(Duration::from_secs(amount.checked_mul(60)?)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}
