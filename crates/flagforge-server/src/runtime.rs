// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server runtime: wires the store, locks, cache, engine, janitor, and the
//! gRPC server together, and owns graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::info;

use flagforge_core::Config;
use flagforge_core::lock::LockService;
use flagforge_core::lock::etcd::EtcdLockBackend;
use flagforge_core::store::FsStore;
use flagforge_protocol::{ChallengeServiceServer, InfoServiceServer, InstanceServiceServer};
use flagforge_scenario::ScenarioCache;
use flagforge_scenario::engine::Engine;
use flagforge_scenario::engine::pulumi::PulumiEngine;

use crate::janitor::Janitor;
use crate::services::{ChallengeGrpc, InfoGrpc, InstanceGrpc};
use crate::state::AppState;

/// A running flagforge server.
pub struct Runtime {
    state: Arc<AppState>,
    addr: SocketAddr,
    janitor_shutdown: Arc<Notify>,
    janitor_handle: JoinHandle<()>,
    grpc_shutdown: Arc<Notify>,
    grpc_handle: JoinHandle<std::result::Result<(), tonic::transport::Error>>,
}

impl Runtime {
    /// Build all components from configuration and start serving.
    pub async fn start(config: Config) -> Result<Self> {
        let store = FsStore::new(&config.directory);

        let locks = match &config.etcd {
            Some(etcd) => {
                info!(endpoint = %etcd.endpoint, "Using etcd lock backend");
                LockService::new(Arc::new(EtcdLockBackend::connect(etcd).await?))
            }
            None => LockService::local(),
        };

        let cache = ScenarioCache::new(&config.cache, &config.oci)?;
        let engine: Arc<dyn Engine> =
            Arc::new(PulumiEngine::new(&config.cache, config.engine_timeout()));

        let state = Arc::new(AppState::new(store, locks, cache, engine));
        Self::start_with_state(config, state).await
    }

    /// Start serving over pre-built state. Used by tests to inject a mock
    /// engine.
    pub async fn start_with_state(config: Config, state: Arc<AppState>) -> Result<Self> {
        let janitor = Janitor::from_config(state.clone(), &config.janitor)?;
        let janitor_shutdown = janitor.shutdown_handle();
        let janitor_handle = tokio::spawn(async move { janitor.run().await });

        let grpc_shutdown = Arc::new(Notify::new());
        let signal = {
            let shutdown = grpc_shutdown.clone();
            async move { shutdown.notified().await }
        };

        let addr = config.grpc_addr;
        let router = tonic::transport::Server::builder()
            .add_service(ChallengeServiceServer::new(ChallengeGrpc::new(state.clone())))
            .add_service(InstanceServiceServer::new(InstanceGrpc::new(state.clone())))
            .add_service(InfoServiceServer::new(InfoGrpc::new(state.clone())));
        let grpc_handle = tokio::spawn(router.serve_with_shutdown(addr, signal));

        info!(addr = %addr, "gRPC server started");
        Ok(Self {
            state,
            addr,
            janitor_shutdown,
            janitor_handle,
            grpc_shutdown,
            grpc_handle,
        })
    }

    /// Shared handler state.
    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Listen address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop the janitor and the gRPC server, waiting for both to drain.
    pub async fn shutdown(self) -> Result<()> {
        self.janitor_shutdown.notify_one();
        self.grpc_shutdown.notify_one();

        let _ = self.janitor_handle.await;
        self.grpc_handle.await??;

        info!("Runtime shut down");
        Ok(())
    }
}
