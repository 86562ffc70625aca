// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error-to-status mapping.
//!
//! The one place where internal errors become user-visible gRPC codes.

use tonic::{Code, Status};

use flagforge_core::lock::LockError;
use flagforge_core::store::StoreError;
use flagforge_scenario::{EngineError, ScenarioError};

use crate::error::Error;

impl From<Error> for Status {
    fn from(error: Error) -> Self {
        let code = code_for(&error);
        Status::new(code, error.to_string())
    }
}

fn code_for(error: &Error) -> Code {
    match error {
        Error::InvalidRequest(_) => Code::InvalidArgument,
        Error::ChallengeNotFound(_) => Code::NotFound,
        Error::InstanceNotFound { .. } => Code::NotFound,
        // An instance operation naming an unregistered challenge is a
        // precondition failure, not a lookup miss.
        Error::UnknownChallenge(_) => Code::FailedPrecondition,
        Error::ChallengeExists(_) | Error::InstanceExists { .. } => Code::AlreadyExists,
        Error::InstanceLimit { .. } => Code::FailedPrecondition,
        Error::RenewWithoutTimeout(_) => Code::FailedPrecondition,
        Error::PartialUpdate { .. } | Error::PartialDelete { .. } => Code::FailedPrecondition,
        Error::Store(store) => match store {
            StoreError::NotFound(_) => Code::NotFound,
            StoreError::InvalidKey(_) => Code::InvalidArgument,
            _ => Code::Internal,
        },
        Error::Lock(lock) => match lock {
            LockError::Cancelled => Code::Cancelled,
            _ => Code::Internal,
        },
        Error::Scenario(scenario) => match scenario {
            ScenarioError::Unauthenticated(_) => Code::Unauthenticated,
            ScenarioError::Unavailable(_) => Code::Unavailable,
            ScenarioError::InvalidReference(_)
            | ScenarioError::InvalidArtifact(_)
            | ScenarioError::InvalidDescriptor { .. } => Code::InvalidArgument,
            _ => Code::Internal,
        },
        Error::Engine(engine) => match engine {
            EngineError::Timeout { .. } => Code::DeadlineExceeded,
            // The engine ran; the failure belongs to the user's program.
            EngineError::Scenario { .. } | EngineError::InvalidOutput(_) => Code::InvalidArgument,
            _ => Code::Internal,
        },
    }
}
