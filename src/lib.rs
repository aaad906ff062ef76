//! # Kafka Browser
//!
//! Starts short-lived Kafka consumers on request and dumps whatever they
//! receive into plain text files that can be downloaded over HTTP.
//!
//! A caller names one or more topics and a time budget. The service joins a
//! consumer group, returns one download URL per topic right away, appends
//! every record it sees to `<data_path>/<group>-<topic>.txt`, and leaves the
//! group once the budget elapses.
//!
//! ## Architecture Overview
//!
//! - **[`broker`]**: Broker client facade, with an rdkafka backend and an in-process one
//! - **[`session`]**: Session lifecycle, expiration timers and the artifact sink
//! - **[`server`]**: axum HTTP front end
//! - **[`integration`]**: Composition root wiring everything together
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kafka_browser::broker::MemoryBroker;
//! use kafka_browser::session::StartSessionRequest;
//! use kafka_browser::{BrowserConfig, BrowserSystem};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let broker = MemoryBroker::new();
//!     broker.create_topic("orders", 3).await;
//!
//!     let system = BrowserSystem::with_broker(BrowserConfig::default(), Arc::new(broker)).await?;
//!     let references = system
//!         .session_manager()
//!         .start_session(StartSessionRequest::new(["orders"]).with_timeout("5"))
//!         .await?;
//!
//!     for reference in references {
//!         println!("{} -> {}", reference.topic, reference.download_url);
//!     }
//!     Ok(())
//! }
//! ```

/// Broker client facade.
///
/// Connection, subscription and delivery primitives shared by the rdkafka
/// backend and the in-process broker.
pub mod broker;

/// Ephemeral consumer sessions.
///
/// Session ids, the expiration registry, the append-only record sink and the
/// manager orchestrating them.
pub mod session;

/// HTTP front end.
pub mod server;

/// High-level system integration.
pub mod integration;

/// Environment constants and path utilities.
///
/// Centralizes default values, environment variable names and the artifact
/// naming scheme.
pub mod env;

// CLI module for command-line interface
pub mod cli;

pub use broker::{BrokerClient, BrokerError, MemoryBroker};
pub use cli::{BackendKind, BrowserConfig};
pub use integration::{BrowserSystem, SystemStatus};
pub use session::{
    ArtifactReference, ConsumerSessionManager, SessionError, SessionManagerConfig,
    StartSessionRequest,
};
