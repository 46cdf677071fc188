use energy_price_crawler::infrastructure::{AppConfig, init_logging_with_config, log_system_info};
use tracing::info;

/// Config file path, extension optional.
const CONFIG_PATH_ENV: &str = "ENERGY_CRAWLER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/crawler";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::from_file(&path)?;

    init_logging_with_config(config.logging.clone())?;
    log_system_info();
    info!("Configuration loaded from {path}: {} countries", config.countries.len());

    energy_price_crawler::run(config).await
}
