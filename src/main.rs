use anyhow::{Context, Result};
use kafka_browser::BrowserSystem;
use kafka_browser::cli::{Args, ConfigDiscovery, ExecutionMode, ServeConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kafka_browser=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    match mode {
        ExecutionMode::Serve(config) => run_server(config).await,
        ExecutionMode::ShowConfig { config_override } => show_config(config_override),
    }
}

async fn run_server(serve: ServeConfig) -> Result<()> {
    info!("Starting Kafka browser");

    let mut config = ConfigDiscovery::load(serve.config_override.as_deref())
        .context("Failed to load configuration")?;
    serve.apply_to(&mut config);

    let system = BrowserSystem::new(config).await?;
    system.serve().await
}

fn show_config(config_override: Option<PathBuf>) -> Result<()> {
    ConfigDiscovery::show_discovery_info();

    let config = ConfigDiscovery::load(config_override.as_deref())
        .context("Failed to load configuration")?;
    println!();
    println!("Effective configuration:");
    println!();
    print!("{}", config.to_toml_string()?);
    Ok(())
}
