//! Monitor aggregator: accepts agent reports and serves the operator API.

use api_monitor::config::AggregatorConfig;
use api_monitor::db::Store;
use api_monitor::scheduler::RetentionManager;
use api_monitor::web::Server;

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("api_monitor=info".parse()?))
        .init();

    // Load configuration
    let cfg = AggregatorConfig::load()?;
    tracing::info!("Starting aggregator on {}...", cfg.listen_address);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Start retention sweep
    let retention = RetentionManager::new(store.clone(), Duration::from_secs(cfg.retention_seconds));
    retention.start().await;

    // Serve until signalled
    let server = Server::new(&cfg, store)?;
    let listener = tokio::net::TcpListener::bind(&cfg.listen_address).await?;
    let served = server.serve(listener, api_monitor::shutdown_signal()).await;

    retention.stop().await;
    tracing::info!("Aggregator stopped");

    served?;
    Ok(())
}
