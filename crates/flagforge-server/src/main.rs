// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! flagforge - CTF Challenge Instance Orchestrator
//!
//! A gRPC server responsible for:
//! - Challenge registry (create, query, update, delete)
//! - Instance lifecycle (create, renew, update, delete) on an
//!   infrastructure engine
//! - Expiry of instances past their lifetime (janitor)

use tracing::{info, warn};

use flagforge_core::Config;
use flagforge_server::runtime::Runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        // Logging is not up yet; stderr is all we have.
        eprintln!("No .env file loaded: {e}");
    }

    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("flagforge={}", config.log_level).into()),
        )
        .init();

    info!(
        directory = %config.directory.display(),
        cache = %config.cache.display(),
        grpc_addr = %config.grpc_addr,
        pulumi_timeout_secs = config.pulumi_timeout,
        "Starting flagforge"
    );
    if config.pulumi_timeout == 0 {
        warn!("Engine timeout is disabled; a stuck scenario can wedge a worker");
    }

    let runtime = Runtime::start(config).await?;
    info!("flagforge ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown
    runtime.shutdown().await?;

    info!("flagforge shut down");
    Ok(())
}
