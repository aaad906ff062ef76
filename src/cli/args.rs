//! Command line argument parsing
//!
//! This module handles CLI argument parsing with subcommands:
//! - `serve`: Run the HTTP front end
//! - `show-config`: Show configuration discovery information and the effective configuration

use super::config::{BackendKind, BrowserConfig};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Serve(ServeConfig),
    ShowConfig { config_override: Option<PathBuf> },
}

/// Flags of the `serve` command; every field overrides the loaded configuration
#[derive(Debug, Default)]
pub struct ServeConfig {
    pub config_override: Option<PathBuf>,
    pub listen: Option<SocketAddr>,
    pub data_path: Option<PathBuf>,
    pub backend: Option<BackendKind>,
    pub download_url: Option<String>,
}

impl ServeConfig {
    /// Apply the command line flags on top of `config`
    pub fn apply_to(&self, config: &mut BrowserConfig) {
        if let Some(listen) = self.listen {
            config.listen_addr = listen.to_string();
        }
        if let Some(data_path) = &self.data_path {
            config.data_path = data_path.clone();
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(download_url) = &self.download_url {
            config.download_url_base = download_url.clone();
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "kafka-browser")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ephemeral Kafka consumers that dump topics into downloadable text files")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Address to listen on
        #[arg(long = "listen", value_name = "ADDR")]
        listen: Option<SocketAddr>,
        /// Directory the artifacts are written to
        #[arg(long = "data-path", value_name = "DIR")]
        data_path: Option<PathBuf>,
        /// Broker backend
        #[arg(long = "backend", value_enum)]
        backend: Option<BackendKind>,
        /// Base of the download URLs handed back to callers
        #[arg(long = "download-url", value_name = "BASE")]
        download_url: Option<String>,
    },
    /// Show configuration discovery information
    ShowConfig {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Serve {
                config,
                listen,
                data_path,
                backend,
                download_url,
            }) => Ok(ExecutionMode::Serve(ServeConfig {
                config_override: config.clone(),
                listen: *listen,
                data_path: data_path.clone(),
                backend: *backend,
                download_url: download_url.clone(),
            })),
            Some(Commands::ShowConfig { config }) => Ok(ExecutionMode::ShowConfig {
                config_override: config.clone(),
            }),
            None => Err(
                "No command specified. Use 'kafka-browser --help' to see available commands."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_command_flags() {
        let args = Args::try_parse_from([
            "kafka-browser",
            "serve",
            "-c",
            "browser.toml",
            "--listen",
            "127.0.0.1:8080",
            "--data-path",
            "/srv/dumps",
            "--backend",
            "memory",
            "--download-url",
            "https://kafka.example.com",
        ])
        .unwrap();

        let mode = args.mode().unwrap();
        if let ExecutionMode::Serve(serve) = mode {
            assert_eq!(serve.config_override, Some(PathBuf::from("browser.toml")));
            assert_eq!(serve.listen, Some("127.0.0.1:8080".parse().unwrap()));
            assert_eq!(serve.backend, Some(BackendKind::Memory));

            let mut config = BrowserConfig::default();
            serve.apply_to(&mut config);
            assert_eq!(config.listen_addr, "127.0.0.1:8080");
            assert_eq!(config.data_path, PathBuf::from("/srv/dumps"));
            assert_eq!(config.backend, BackendKind::Memory);
            assert_eq!(config.download_url_base, "https://kafka.example.com");
        } else {
            panic!("Expected Serve mode");
        }
    }

    #[test]
    fn test_serve_without_flags_keeps_config() {
        let args = Args::try_parse_from(["kafka-browser", "serve"]).unwrap();

        let ExecutionMode::Serve(serve) = args.mode().unwrap() else {
            panic!("Expected Serve mode");
        };
        let mut config = BrowserConfig::default();
        serve.apply_to(&mut config);
        assert_eq!(config, BrowserConfig::default());
    }

    #[test]
    fn test_invalid_listen_address_is_rejected() {
        let result = Args::try_parse_from(["kafka-browser", "serve", "--listen", "nowhere"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_show_config_command() {
        let args = Args::try_parse_from(["kafka-browser", "show-config"]).unwrap();
        assert!(matches!(
            args.mode().unwrap(),
            ExecutionMode::ShowConfig {
                config_override: None
            }
        ));
    }

    #[test]
    fn test_no_command_error() {
        let args = Args { command: None };
        let result = args.mode();
        assert!(result.is_err());
    }
}
