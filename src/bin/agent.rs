//! Monitor agent: polls the configured endpoints and reports to the aggregator.

use api_monitor::config::AgentConfig;
use api_monitor::probe::HttpPoller;
use api_monitor::report::HttpReporter;
use api_monitor::scheduler::AgentScheduler;

use std::sync::Arc;
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
    let cfg = AgentConfig::load()?;
    tracing::info!(
        "Starting agent {} with {} endpoints, reporting to {}",
        cfg.name,
        cfg.endpoints.len(),
        cfg.report_endpoint
    );

    let poller = Arc::new(HttpPoller::new(cfg.poll_timeout())?);
    let reporter = Arc::new(HttpReporter::new(
        &cfg.report_endpoint,
        &cfg.service_key,
        &cfg.name,
        cfg.report_timeout(),
    )?);

    let scheduler = AgentScheduler::new(cfg, poller, reporter);
    scheduler.start().await;

    api_monitor::shutdown_signal().await;
    tracing::info!("Shutdown requested, stopping agent");
    scheduler.stop().await;

    Ok(())
}
