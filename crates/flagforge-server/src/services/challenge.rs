// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! ChallengeService gRPC implementation.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use flagforge_protocol::convert;
use flagforge_protocol::v1;

use crate::challenge::{self, CreateChallengeParams, UpdateChallengeParams};
use crate::services::request_deadline;
use crate::state::AppState;

/// gRPC binding for challenge operations.
pub struct ChallengeGrpc {
    state: Arc<AppState>,
}

impl ChallengeGrpc {
    /// Create the service over shared state.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl v1::challenge_service_server::ChallengeService for ChallengeGrpc {
    async fn create_challenge(
        &self,
        request: Request<v1::CreateChallengeRequest>,
    ) -> Result<Response<v1::Challenge>, Status> {
        let deadline = request_deadline(&request);
        let req = request.into_inner();
        let params = CreateChallengeParams {
            id: req.id,
            scenario: req.scenario,
            archive: (!req.archive.is_empty()).then_some(req.archive),
            until: req.until.as_ref().and_then(convert::datetime),
            timeout: req.timeout,
            min: req.min,
            max: req.max,
            additional: req.additional.into_iter().collect(),
            image_pull_secrets: req.image_pull_secrets,
        };

        let created = challenge::create_challenge(&self.state, params, deadline).await?;
        Ok(Response::new(convert::challenge_to_proto(&created)))
    }

    async fn retrieve_challenge(
        &self,
        request: Request<v1::RetrieveChallengeRequest>,
    ) -> Result<Response<v1::Challenge>, Status> {
        let req = request.into_inner();
        let found = challenge::retrieve_challenge(&self.state, &req.id).await?;
        Ok(Response::new(convert::challenge_to_proto(&found)))
    }

    type QueryChallengeStream = ReceiverStream<Result<v1::ChallengeQueryItem, Status>>;

    async fn query_challenge(
        &self,
        _request: Request<v1::QueryChallengeRequest>,
    ) -> Result<Response<Self::QueryChallengeStream>, Status> {
        let (tx, rx) = mpsc::channel(16);
        let state = self.state.clone();

        tokio::spawn(async move {
            let ids = match state.store.list_challenges().await {
                Ok(ids) => ids,
                Err(e) => {
                    let _ = tx.send(Err(Status::internal(e.to_string()))).await;
                    return;
                }
            };

            for id in ids {
                // A record failing to read becomes an item with `error` set;
                // the stream itself keeps going.
                let item = match state.store.read_challenge(&id).await {
                    Ok(found) => v1::ChallengeQueryItem {
                        challenge: Some(convert::challenge_to_proto(&found)),
                        error: String::new(),
                    },
                    Err(e) => v1::ChallengeQueryItem {
                        challenge: None,
                        error: format!("{id}: {e}"),
                    },
                };
                if tx.send(Ok(item)).await.is_err() {
                    break; // client went away
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn update_challenge(
        &self,
        request: Request<v1::UpdateChallengeRequest>,
    ) -> Result<Response<v1::Challenge>, Status> {
        let deadline = request_deadline(&request);
        let req = request.into_inner();
        let params = UpdateChallengeParams {
            id: req.id,
            scenario: req.scenario,
            archive: (!req.archive.is_empty()).then_some(req.archive),
            until: req.until.as_ref().and_then(convert::datetime),
            timeout: req.timeout,
            min: req.min,
            max: req.max,
            additional: req.additional.map(|m| m.entries.into_iter().collect()),
            image_pull_secrets: req.image_pull_secrets.map(|l| l.entries),
        };

        let updated = challenge::update_challenge(&self.state, params, deadline).await?;
        Ok(Response::new(convert::challenge_to_proto(&updated)))
    }

    async fn delete_challenge(
        &self,
        request: Request<v1::DeleteChallengeRequest>,
    ) -> Result<Response<v1::DeleteChallengeResponse>, Status> {
        let deadline = request_deadline(&request);
        let req = request.into_inner();
        challenge::delete_challenge(&self.state, &req.id, deadline).await?;
        Ok(Response::new(v1::DeleteChallengeResponse {}))
    }
}
