// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! InstanceService gRPC implementation.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use flagforge_core::store::FsStore;
use flagforge_protocol::convert;
use flagforge_protocol::v1;

use crate::instance;
use crate::services::request_deadline;
use crate::state::AppState;

/// gRPC binding for instance operations.
pub struct InstanceGrpc {
    state: Arc<AppState>,
}

impl InstanceGrpc {
    /// Create the service over shared state.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl v1::instance_service_server::InstanceService for InstanceGrpc {
    async fn create_instance(
        &self,
        request: Request<v1::CreateInstanceRequest>,
    ) -> Result<Response<v1::Instance>, Status> {
        let deadline = request_deadline(&request);
        let req = request.into_inner();
        let created = instance::create_instance(
            &self.state,
            &req.challenge_id,
            &req.source_id,
            req.additional.into_iter().collect(),
            deadline,
        )
        .await?;
        Ok(Response::new(convert::instance_to_proto(&created)))
    }

    async fn retrieve_instance(
        &self,
        request: Request<v1::RetrieveInstanceRequest>,
    ) -> Result<Response<v1::Instance>, Status> {
        let req = request.into_inner();
        let found =
            instance::retrieve_instance(&self.state, &req.challenge_id, &req.source_id).await?;
        Ok(Response::new(convert::instance_to_proto(&found)))
    }

    type QueryInstanceStream = ReceiverStream<Result<v1::InstanceQueryItem, Status>>;

    async fn query_instance(
        &self,
        request: Request<v1::QueryInstanceRequest>,
    ) -> Result<Response<Self::QueryInstanceStream>, Status> {
        let req = request.into_inner();
        let (tx, rx) = mpsc::channel(16);
        let state = self.state.clone();

        tokio::spawn(async move {
            let challenge_ids = if req.challenge_id.is_empty() {
                match state.store.list_challenges().await {
                    Ok(ids) => ids,
                    Err(e) => {
                        let _ = tx.send(Err(Status::internal(e.to_string()))).await;
                        return;
                    }
                }
            } else {
                vec![req.challenge_id]
            };

            for challenge_id in challenge_ids {
                if stream_challenge_instances(&state.store, &challenge_id, &tx)
                    .await
                    .is_err()
                {
                    return; // client went away
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn update_instance(
        &self,
        request: Request<v1::UpdateInstanceRequest>,
    ) -> Result<Response<v1::Instance>, Status> {
        let deadline = request_deadline(&request);
        let req = request.into_inner();
        let updated = instance::update_instance(
            &self.state,
            &req.challenge_id,
            &req.source_id,
            req.additional.map(|m| m.entries.into_iter().collect()),
            deadline,
        )
        .await?;
        Ok(Response::new(convert::instance_to_proto(&updated)))
    }

    async fn renew_instance(
        &self,
        request: Request<v1::RenewInstanceRequest>,
    ) -> Result<Response<v1::Instance>, Status> {
        let deadline = request_deadline(&request);
        let req = request.into_inner();
        let renewed =
            instance::renew_instance(&self.state, &req.challenge_id, &req.source_id, deadline)
                .await?;
        Ok(Response::new(convert::instance_to_proto(&renewed)))
    }

    async fn delete_instance(
        &self,
        request: Request<v1::DeleteInstanceRequest>,
    ) -> Result<Response<v1::DeleteInstanceResponse>, Status> {
        let deadline = request_deadline(&request);
        let req = request.into_inner();
        instance::delete_instance(&self.state, &req.challenge_id, &req.source_id, deadline)
            .await?;
        Ok(Response::new(v1::DeleteInstanceResponse {}))
    }
}

/// Stream every instance of one challenge. Errors on a single record become
/// items with `error` set. Returns `Err(())` when the receiver is gone.
async fn stream_challenge_instances(
    store: &FsStore,
    challenge_id: &str,
    tx: &mpsc::Sender<Result<v1::InstanceQueryItem, Status>>,
) -> Result<(), ()> {
    let identities = match store.list_instances(challenge_id).await {
        Ok(identities) => identities,
        Err(e) => {
            let item = v1::InstanceQueryItem {
                instance: None,
                error: format!("{challenge_id}: {e}"),
            };
            return tx.send(Ok(item)).await.map_err(|_| ());
        }
    };

    for identity in identities {
        let item = match store.read_instance(challenge_id, &identity).await {
            Ok(found) => v1::InstanceQueryItem {
                instance: Some(convert::instance_to_proto(&found)),
                error: String::new(),
            },
            Err(e) => v1::InstanceQueryItem {
                instance: None,
                error: format!("{challenge_id}/{identity}: {e}"),
            },
        };
        tx.send(Ok(item)).await.map_err(|_| ())?;
    }
    Ok(())
}
