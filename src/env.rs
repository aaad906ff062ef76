//! Environment constants and path utilities for the Kafka browser.
//!
//! This module centralizes the environment variable names, built-in defaults and
//! the artifact naming scheme shared by the record sink, the download URLs and
//! the artifact route.

use std::path::{Path, PathBuf};

/// Application name used as the Kafka client id by default
pub const DEFAULT_APP_NAME: &str = "kafka-browser";

/// Configuration directory name (hidden, like .git)
pub const CONFIG_DIR_NAME: &str = ".kafka-browser";

/// Configuration file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "kafka-browser.toml";

/// URL path segment under which artifacts are served
pub const DOWNLOAD_PREFIX: &str = "d";

/// Artifact file extension
pub const ARTIFACT_EXTENSION: &str = "txt";

/// Prefix of generated session ids
pub const GENERATED_ID_PREFIX: &str = "consumer";

/// Built-in defaults
pub mod defaults {
    /// Default broker list
    pub const BROKER: &str = "localhost:9092";

    /// Connection timeout in milliseconds
    pub const CONNECTION_TIMEOUT_MS: u64 = 1000;

    /// Request timeout in milliseconds
    pub const REQUEST_TIMEOUT_MS: u64 = 30_000;

    /// Shared artifact storage root
    pub const DATA_PATH: &str = "/var/tmp/kafka-browser";

    /// Base of the download URLs handed back to callers
    pub const DOWNLOAD_URL_BASE: &str = "http://localhost:4000";

    /// HTTP listen address
    pub const LISTEN_ADDR: &str = "0.0.0.0:4000";

    /// Consume budget when the caller does not pass one
    pub const CONSUME_TIMEOUT_SECS: f64 = 60.0;
}

/// Environment variable names read at startup
pub mod vars {
    pub const APP_NAME: &str = "APP_NAME";
    /// JSON array of `host:port` strings
    pub const KAFKA_BROKERS: &str = "KAFKA_BROKERS";
    pub const CONNECTION_TIMEOUT: &str = "CONNECTION_TIMEOUT";
    pub const REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";
    pub const DATA_PATH: &str = "DATA_PATH";
    pub const DOWNLOAD_URL_TEMPLATE: &str = "DOWNLOAD_URL_TEMPLATE";
    pub const LISTEN_ADDR: &str = "LISTEN_ADDR";
    pub const CONSUME_TIMEOUT: &str = "CONSUME_TIMEOUT";
    pub const BROKER_BACKEND: &str = "BROKER_BACKEND";
}

/// File name of the artifact for a `(session, topic)` pair
pub fn artifact_file_name(session_id: &str, topic: &str) -> String {
    format!("{}-{}.{}", session_id, topic, ARTIFACT_EXTENSION)
}

/// Build the artifact path under the data root
pub fn artifact_path(data_path: &Path, session_id: &str, topic: &str) -> PathBuf {
    data_path.join(artifact_file_name(session_id, topic))
}

/// Build the download URL of an artifact from the configured base
pub fn download_url(base: &str, session_id: &str, topic: &str) -> String {
    format!(
        "{}/{}/{}",
        base.trim_end_matches('/'),
        DOWNLOAD_PREFIX,
        artifact_file_name(session_id, topic)
    )
}

/// Check that a session id or topic can be embedded in a file name.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(CONFIG_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)
}
