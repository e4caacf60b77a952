use flowproxy::config::Config;
use flowproxy::{Reconfigure, RoutingIntent};
use std::path::PathBuf;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("flowproxy=debug".parse().expect("valid log directive")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let intent_path = args.next().map(PathBuf::from);

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), consul = %config.consul.address, "Configuration loaded");

    let reconfigure = Reconfigure::from_config(&config)?;

    match intent_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            let intent: RoutingIntent = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Invalid routing intent '{}': {}", path.display(), e))?;
            reconfigure.execute(&intent).await?;
        }
        None => {
            // No intent given: recover every service from Consul
            reconfigure
                .reload_all_services(&config.consul.address)
                .await?;
        }
    }

    Ok(())
}
