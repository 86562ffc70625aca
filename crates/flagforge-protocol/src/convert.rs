// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conversions between store records and wire messages.

use chrono::{DateTime, TimeZone, Utc};

use flagforge_core::store::{Challenge, Instance};

use crate::v1;

/// Convert a UTC instant to a protobuf timestamp.
pub fn timestamp(instant: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: instant.timestamp(),
        nanos: instant.timestamp_subsec_nanos() as i32,
    }
}

/// Convert a protobuf timestamp to a UTC instant.
///
/// Returns `None` for out-of-range values.
pub fn datetime(ts: &prost_types::Timestamp) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts.seconds, ts.nanos.max(0) as u32).single()
}

/// Convert a challenge record to its wire representation.
pub fn challenge_to_proto(challenge: &Challenge) -> v1::Challenge {
    v1::Challenge {
        id: challenge.id.clone(),
        scenario: challenge.scenario.clone(),
        hash: challenge.hash.clone(),
        until: challenge.until.map(timestamp),
        timeout: challenge.timeout,
        min: challenge.min,
        max: challenge.max,
        additional: challenge
            .additional
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        image_pull_secrets: challenge.image_pull_secrets.clone(),
    }
}

/// Convert an instance record to its wire representation.
pub fn instance_to_proto(instance: &Instance) -> v1::Instance {
    v1::Instance {
        challenge_id: instance.challenge_id.clone(),
        source_id: instance.source_id.clone(),
        identity: instance.identity.clone(),
        since: Some(timestamp(instance.since)),
        last_renew: Some(timestamp(instance.last_renew)),
        until: instance.until.map(timestamp),
        connection_info: instance.connection_info.clone(),
        flags: instance.flags.clone(),
        additional: instance
            .additional
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}
