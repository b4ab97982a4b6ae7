//! API Monitor - endpoint telemetry agent and aggregation server.
//!
//! Agents poll JSON endpoints on a fixed interval, extract one scalar from
//! each response and report the batch to the aggregator, which keeps a
//! bounded history per metric in SQLite and serves it to operators.

pub mod config;
pub mod db;
pub mod probe;
pub mod protocol;
pub mod report;
pub mod scheduler;
pub mod web;

#[cfg(test)]
mod test_support;

/// Resolve on Ctrl-C, or on SIGTERM where supported.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
