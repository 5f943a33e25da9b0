//! # Connections API Main Entry Point

use connections::{config::ConfigLoader, db, logging, server::run_server};
use migration::MigratorTrait;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::new().load()?;
    config.validate()?;

    logging::init_subscriber(&config);

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let pool = db::init_pool(&config).await?;
    migration::Migrator::up(&pool, None).await?;

    run_server(config, pool).await
}
