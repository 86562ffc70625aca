// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! InfoService gRPC implementation.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use flagforge_protocol::v1;

use crate::state::AppState;

/// Version and liveness endpoint.
pub struct InfoGrpc {
    state: Arc<AppState>,
}

impl InfoGrpc {
    /// Create the service over shared state.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl v1::info_service_server::InfoService for InfoGrpc {
    async fn info(
        &self,
        _request: Request<v1::InfoRequest>,
    ) -> Result<Response<v1::InfoResponse>, Status> {
        Ok(Response::new(v1::InfoResponse {
            version: self.state.version.clone(),
            uptime_seconds: self.state.start_time.elapsed().as_secs(),
        }))
    }

    async fn healthcheck(
        &self,
        _request: Request<v1::HealthcheckRequest>,
    ) -> Result<Response<v1::HealthcheckResponse>, Status> {
        Ok(Response::new(v1::HealthcheckResponse { ok: true }))
    }
}
