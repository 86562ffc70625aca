// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for flagforge.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default timeout for engine operations, in seconds.
pub const DEFAULT_PULUMI_TIMEOUT_SECS: u64 = 120;

/// Process configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for the filesystem store (challenge and instance records).
    pub directory: PathBuf,
    /// Root directory for the scenario cache (OCI artifacts, engine home).
    pub cache: PathBuf,
    /// Log level used when `RUST_LOG` is not set.
    pub log_level: String,
    /// gRPC listen address.
    pub grpc_addr: SocketAddr,
    /// Maximum time in seconds for a single engine operation (up, destroy,
    /// preview, ...). 0 disables the timeout, which is not recommended.
    pub pulumi_timeout: u64,
    /// Janitor scheduling.
    pub janitor: JanitorConfig,
    /// OpenTelemetry settings (consumed by the tracing setup, external to the core).
    pub otel: OtelConfig,
    /// Optional etcd endpoint for the distributed lock backend.
    pub etcd: Option<EtcdConfig>,
    /// OCI registry access.
    pub oci: OciConfig,
}

/// How the janitor schedules its expiry sweeps.
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// Interval between sweeps in ticker mode.
    pub ticker: Duration,
    /// Cron expression; when set, it takes precedence over the ticker.
    pub cron: Option<String>,
}

/// OpenTelemetry settings.
#[derive(Debug, Clone)]
pub struct OtelConfig {
    /// Whether trace export is enabled.
    pub tracing: bool,
    /// Service name reported to the collector.
    pub service_name: String,
}

/// etcd connection settings for the distributed lock backend.
#[derive(Debug, Clone)]
pub struct EtcdConfig {
    /// Endpoint, e.g. `http://etcd:2379`.
    pub endpoint: String,
    /// Optional username.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
}

/// OCI registry access settings.
#[derive(Debug, Clone, Default)]
pub struct OciConfig {
    /// Use plain HTTP and skip certificate verification.
    pub insecure: bool,
    /// Optional registry username.
    pub username: Option<String>,
    /// Optional registry password.
    pub password: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let directory = PathBuf::from(
            std::env::var("FLAGFORGE_DIRECTORY")
                .unwrap_or_else(|_| ".data/flagforge".to_string()),
        );

        let cache = PathBuf::from(
            std::env::var("FLAGFORGE_CACHE").unwrap_or_else(|_| ".data/cache".to_string()),
        );

        let log_level =
            std::env::var("FLAGFORGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let port: u16 = std::env::var("FLAGFORGE_GRPC_PORT")
            .unwrap_or_else(|_| "9090".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;
        let grpc_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let pulumi_timeout = match std::env::var("FLAGFORGE_PULUMI_TIMEOUT") {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("FLAGFORGE_PULUMI_TIMEOUT"))?,
            Err(_) => DEFAULT_PULUMI_TIMEOUT_SECS,
        };

        let ticker_secs: u64 = match std::env::var("FLAGFORGE_JANITOR_TICKER") {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("FLAGFORGE_JANITOR_TICKER"))?,
            Err(_) => 300,
        };
        let janitor = JanitorConfig {
            ticker: Duration::from_secs(ticker_secs),
            cron: std::env::var("FLAGFORGE_JANITOR_CRON").ok(),
        };

        let otel = OtelConfig {
            tracing: std::env::var("FLAGFORGE_OTEL_TRACING")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            service_name: std::env::var("FLAGFORGE_OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "flagforge".to_string()),
        };

        let etcd = std::env::var("FLAGFORGE_ETCD_ENDPOINT")
            .ok()
            .map(|endpoint| EtcdConfig {
                endpoint,
                username: std::env::var("FLAGFORGE_ETCD_USERNAME").ok(),
                password: std::env::var("FLAGFORGE_ETCD_PASSWORD").ok(),
            });

        let oci = OciConfig {
            insecure: std::env::var("FLAGFORGE_OCI_INSECURE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            username: std::env::var("FLAGFORGE_OCI_USERNAME").ok(),
            password: std::env::var("FLAGFORGE_OCI_PASSWORD").ok(),
        };

        Ok(Self {
            directory,
            cache,
            log_level,
            grpc_addr,
            pulumi_timeout,
            janitor,
            otel,
            etcd,
            oci,
        })
    }

    /// The engine operation timeout as a duration, `None` when disabled.
    pub fn engine_timeout(&self) -> Option<Duration> {
        match self.pulumi_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The gRPC port is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// An environment variable holds an unparseable value.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
