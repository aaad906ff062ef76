//! CLI-specific functionality for the Kafka browser
//!
//! This module contains argument parsing and configuration discovery.

pub mod args;
pub mod config;

pub use args::{Args, ExecutionMode, ServeConfig};
pub use config::{BackendKind, BrowserConfig, ConfigDiscovery, ConfigError};
