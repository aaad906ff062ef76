//! # System Integration
//!
//! Wires the broker client, session registry, record sink and session manager
//! together and exposes them through the HTTP router.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  BrowserSystem                   │
//! │  ┌────────────┐ ┌────────────┐ ┌───────────────┐ │
//! │  │   Broker   │ │  Session   │ │  HTTP router  │ │
//! │  │   client   │ │  manager   │ │   (axum)      │ │
//! │  └────────────┘ └────────────┘ └───────────────┘ │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use kafka_browser::{BrowserConfig, BrowserSystem};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BrowserConfig::default();
//!     let system = BrowserSystem::new(config).await?;
//!     system.serve().await
//! }
//! ```

use crate::broker::{BrokerClient, MemoryBroker};
use crate::cli::{BackendKind, BrowserConfig};
use crate::server::{self, ApiState};
use crate::session::{ConsumerSessionManager, ExpiryFailure, RecordSink, SessionRegistry};
use anyhow::{Context, Result};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// File written and removed at startup to prove the data root is usable
const PROBE_FILE_NAME: &str = ".kafka-browser-probe";

/// The running service: broker client, session manager and HTTP surface
pub struct BrowserSystem {
    config: BrowserConfig,
    broker: Arc<dyn BrokerClient>,
    manager: Arc<ConsumerSessionManager>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub broker: String,
    pub sessions: usize,
    pub pending_timers: usize,
    pub data_path: PathBuf,
}

impl BrowserSystem {
    /// Validate `config`, prepare the data root and connect the configured backend
    pub async fn new(config: BrowserConfig) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let broker = Self::build_broker(&config)?;
        Self::with_broker(config, broker).await
    }

    /// Build the system around an existing broker client
    pub async fn with_broker(config: BrowserConfig, broker: Arc<dyn BrokerClient>) -> Result<Self> {
        prepare_data_path(&config.data_path).await?;

        let registry = SessionRegistry::new().with_failure_reporter(spawn_failure_logger());
        let sink = RecordSink::new(&config.data_path).with_sync_writes(config.sync_writes);
        let manager = ConsumerSessionManager::new(
            Arc::clone(&broker),
            Arc::new(registry),
            Arc::new(sink),
            config.session_config(),
        );

        info!(
            broker = broker.broker_name(),
            data_path = %config.data_path.display(),
            download_url_base = %config.download_url_base,
            "Kafka browser initialized"
        );

        Ok(Self {
            config,
            broker,
            manager: Arc::new(manager),
        })
    }

    fn build_broker(config: &BrowserConfig) -> Result<Arc<dyn BrokerClient>> {
        match config.backend {
            BackendKind::Memory => Ok(Arc::new(MemoryBroker::new())),
            BackendKind::Kafka => Self::kafka_broker(config),
        }
    }

    #[cfg(feature = "kafka")]
    fn kafka_broker(config: &BrowserConfig) -> Result<Arc<dyn BrokerClient>> {
        use crate::broker::{KafkaBroker, KafkaSettings};

        Ok(Arc::new(KafkaBroker::new(KafkaSettings {
            brokers: config.brokers.clone(),
            client_id: config.app_name.clone(),
            connection_timeout: config.connection_timeout(),
            request_timeout: config.request_timeout(),
        })))
    }

    #[cfg(not(feature = "kafka"))]
    fn kafka_broker(_config: &BrowserConfig) -> Result<Arc<dyn BrokerClient>> {
        anyhow::bail!(
            "the kafka backend is not available in this build; rebuild with `--features kafka` or use `--backend memory`"
        )
    }

    /// HTTP router over this system
    pub fn router(&self) -> Router {
        server::create_router(ApiState {
            manager: Arc::clone(&self.manager),
            broker: Arc::clone(&self.broker),
            data_path: self.config.data_path.clone(),
        })
    }

    /// Serve HTTP until Ctrl-C
    pub async fn serve(&self) -> Result<()> {
        let addr = self.config.listen_socket_addr()?;
        server::serve(addr, self.router(), server::shutdown_signal())
            .await
            .with_context(|| format!("HTTP server on {} failed", addr))?;

        info!(
            sessions = self.manager.sessions().len(),
            "Kafka browser stopped"
        );
        Ok(())
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            broker: self.broker.broker_name().to_string(),
            sessions: self.manager.sessions().len(),
            pending_timers: self.manager.registry().pending_count(),
            data_path: self.config.data_path.clone(),
        }
    }

    pub fn session_manager(&self) -> Arc<ConsumerSessionManager> {
        Arc::clone(&self.manager)
    }

    pub fn broker(&self) -> Arc<dyn BrokerClient> {
        Arc::clone(&self.broker)
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }
}

/// Log every expiry action that failed; the consumer it belonged to may linger
fn spawn_failure_logger() -> mpsc::UnboundedSender<ExpiryFailure> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ExpiryFailure>();
    tokio::spawn(async move {
        while let Some(failure) = rx.recv().await {
            error!(
                session_id = %failure.session_id,
                generation = failure.generation,
                reason = %failure.reason,
                "Consumer could not be released after its budget elapsed"
            );
        }
    });
    tx
}

/// Create the data root if needed and prove it is readable and writable
pub async fn prepare_data_path(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create data directory {:?}", path))?;

    let probe = path.join(PROBE_FILE_NAME);
    tokio::fs::write(&probe, b"probe")
        .await
        .with_context(|| format!("Data directory {:?} is not writable", path))?;
    let content = tokio::fs::read(&probe)
        .await
        .with_context(|| format!("Data directory {:?} is not readable", path))?;
    tokio::fs::remove_file(&probe)
        .await
        .with_context(|| format!("Failed to remove probe file {:?}", probe))?;

    anyhow::ensure!(
        content == b"probe",
        "Data directory {:?} returned unexpected probe content",
        path
    );
    Ok(())
}
