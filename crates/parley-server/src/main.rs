use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::info;

mod auth;
mod config;
mod db;
mod messages;
mod server;
mod telemetry;

use config::ServerConfig;
use db::{Database, MigrationRunner};

#[tokio::main]
async fn main() -> Result<()> {
    // Export to a collector only when one is configured
    if let Some(endpoint) = telemetry::otlp_endpoint() {
        telemetry::init(&endpoint).map_err(|e| anyhow!("failed to initialize telemetry: {}", e))?;
    } else {
        telemetry::init_local().map_err(|e| anyhow!("failed to initialize logging: {}", e))?;
    }

    info!("Parley Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("License: AGPL-3.0");

    let config = ServerConfig::from_env()?;
    config.log_config();

    let db = Arc::new(Database::open("parley", config.db_path.as_deref()).await?);
    let runner = MigrationRunner::parley();
    runner.run(&db).await?;
    info!(
        version = ?runner.current_version(&db).await?,
        "Database schema up to date"
    );

    let result = server::start(db, config).await;
    telemetry::shutdown();
    result
}
