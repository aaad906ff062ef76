//! Configuration discovery and loading
//!
//! This module handles the configuration discovery hierarchy:
//! 1. Current directory: ./kafka-browser.toml or ./.kafka-browser/config.toml
//! 2. User config: ~/.kafka-browser/config.toml
//! 3. System config: /etc/kafka-browser/config.toml
//! 4. Built-in defaults
//!
//! Environment variables are applied on top of whatever was loaded, and the
//! `serve` flags on top of that.

use crate::env::{self, defaults, vars};
use crate::session::SessionManagerConfig;
use serde::{Deserialize, Serialize};
use std::env as std_env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Which broker implementation backs the service.
///
/// Defaults to `kafka` when the `kafka` feature is compiled in, `memory` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[cfg_attr(feature = "kafka", default)]
    Kafka,
    /// In-process broker, for demos and local testing
    #[cfg_attr(not(feature = "kafka"), default)]
    Memory,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kafka" => Ok(BackendKind::Kafka),
            "memory" => Ok(BackendKind::Memory),
            other => Err(format!("unknown backend '{}', expected kafka or memory", other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid value '{value}' for {var}: {reason}")]
    InvalidOverride {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Kafka client id
    pub app_name: String,
    pub brokers: Vec<String>,
    pub connection_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Where artifacts are written and served from
    pub data_path: PathBuf,
    pub download_url_base: String,
    pub listen_addr: String,
    pub default_consume_timeout_secs: f64,
    pub backend: BackendKind,
    /// `fsync` every appended entry
    pub sync_writes: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            app_name: env::DEFAULT_APP_NAME.to_string(),
            brokers: vec![defaults::BROKER.to_string()],
            connection_timeout_ms: defaults::CONNECTION_TIMEOUT_MS,
            request_timeout_ms: defaults::REQUEST_TIMEOUT_MS,
            data_path: PathBuf::from(defaults::DATA_PATH),
            download_url_base: defaults::DOWNLOAD_URL_BASE.to_string(),
            listen_addr: defaults::LISTEN_ADDR.to_string(),
            default_consume_timeout_secs: defaults::CONSUME_TIMEOUT_SECS,
            backend: BackendKind::default(),
            sync_writes: true,
        }
    }
}

fn parse_override<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidOverride {
            var,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

impl BrowserConfig {
    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply the process environment on top of this configuration
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std_env::var(name).ok())
    }

    /// Apply overrides looked up by variable name. Blank values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = get(vars::APP_NAME) {
            self.app_name = value;
        }
        if let Some(value) = get(vars::KAFKA_BROKERS) {
            self.brokers = serde_json::from_str(&value).map_err(|e| {
                ConfigError::InvalidOverride {
                    var: vars::KAFKA_BROKERS,
                    value: value.clone(),
                    reason: format!("expected a JSON array of host:port strings ({})", e),
                }
            })?;
        }
        if let Some(value) = get(vars::CONNECTION_TIMEOUT) {
            self.connection_timeout_ms = parse_override(vars::CONNECTION_TIMEOUT, &value)?;
        }
        if let Some(value) = get(vars::REQUEST_TIMEOUT) {
            self.request_timeout_ms = parse_override(vars::REQUEST_TIMEOUT, &value)?;
        }
        if let Some(value) = get(vars::DATA_PATH) {
            self.data_path = PathBuf::from(value);
        }
        if let Some(value) = get(vars::DOWNLOAD_URL_TEMPLATE) {
            self.download_url_base = value;
        }
        if let Some(value) = get(vars::LISTEN_ADDR) {
            self.listen_addr = value;
        }
        if let Some(value) = get(vars::CONSUME_TIMEOUT) {
            self.default_consume_timeout_secs = parse_override(vars::CONSUME_TIMEOUT, &value)?;
        }
        if let Some(value) = get(vars::BROKER_BACKEND) {
            self.backend = parse_override(vars::BROKER_BACKEND, &value)?;
        }
        Ok(())
    }

    /// Check the configuration before anything is started
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.brokers.is_empty() || self.brokers.iter().any(|b| b.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "at least one non-empty broker address is required".to_string(),
            ));
        }

        let base = url::Url::parse(&self.download_url_base).map_err(|e| {
            ConfigError::Invalid(format!(
                "download_url_base '{}' is not a URL: {}",
                self.download_url_base, e
            ))
        })?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(ConfigError::Invalid(format!(
                "download_url_base '{}' must be an absolute http(s) URL",
                self.download_url_base
            )));
        }

        if self.connection_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connection and request timeouts must be positive".to_string(),
            ));
        }
        if !self.default_consume_timeout_secs.is_finite() || self.default_consume_timeout_secs < 0.0
        {
            return Err(ConfigError::Invalid(format!(
                "default_consume_timeout_secs must be a non-negative number, got {}",
                self.default_consume_timeout_secs
            )));
        }

        self.listen_socket_addr()?;
        Ok(())
    }

    pub fn listen_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr.parse().map_err(|e| {
            ConfigError::Invalid(format!("listen_addr '{}': {}", self.listen_addr, e))
        })
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn session_config(&self) -> SessionManagerConfig {
        SessionManagerConfig {
            download_url_base: self.download_url_base.clone(),
            default_consume_timeout_secs: self.default_consume_timeout_secs,
        }
    }
}

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load the explicit file if given, else the first discovered one, then
    /// apply the environment.
    pub fn load(explicit: Option<&Path>) -> Result<BrowserConfig, ConfigError> {
        let mut config = match explicit {
            Some(path) => {
                info!("Loading configuration from: {:?}", path);
                BrowserConfig::from_toml_file(path)?
            }
            None => Self::discover_config()?,
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<BrowserConfig, ConfigError> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            return BrowserConfig::from_toml_file(config_path);
        }

        info!("No configuration file found, using defaults");
        Ok(BrowserConfig::default())
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        for candidate in Self::config_candidates() {
            debug!("Checking for config file: {:?}", candidate);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        debug!("No config file found in discovery hierarchy");
        None
    }

    /// Configuration file candidates in priority order
    pub fn config_candidates() -> Vec<PathBuf> {
        let current_dir = std_env::current_dir().ok();
        let home_dir = Self::get_home_dir();
        Self::candidates_for(current_dir.as_deref(), home_dir.as_deref())
    }

    fn candidates_for(current_dir: Option<&Path>, home_dir: Option<&Path>) -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(current_dir) = current_dir {
            candidates.push(current_dir.join(env::LOCAL_CONFIG_FILE_NAME));
            candidates.push(env::local_config_file_path(current_dir));
        }

        if let Some(home_dir) = home_dir {
            candidates.push(env::user_config_file_path(home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from("/etc/kafka-browser").join(env::CONFIG_FILE_NAME));

        candidates
    }

    fn get_home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        for (i, candidate) in Self::config_candidates().iter().enumerate() {
            let status = if candidate.is_file() {
                "✓ EXISTS"
            } else if candidate.exists() {
                "✗ NOT A FILE"
            } else {
                "✗ NOT FOUND"
            };
            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        match Self::find_config_file() {
            Some(found) => println!("Active configuration: {:?}", found),
            None => println!("Active configuration: Built-in defaults"),
        }
    }
}
