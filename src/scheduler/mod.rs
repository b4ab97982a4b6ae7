//! Periodic drivers: the agent's poll+report loop and the aggregator's
//! retention sweep.

mod retention;

pub use retention::*;

use crate::config::AgentConfig;
use crate::probe::Poller;
use crate::report::Reporter;

use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Runs one poll+report cycle immediately, then once per query interval,
/// until stopped.
pub struct AgentScheduler {
    config: Arc<AgentConfig>,
    poller: Arc<dyn Poller>,
    reporter: Arc<dyn Reporter>,
    stop: Mutex<Option<broadcast::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AgentScheduler {
    pub fn new(config: AgentConfig, poller: Arc<dyn Poller>, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            config: Arc::new(config),
            poller,
            reporter,
            stop: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Run a single cycle in the caller's task.
    pub async fn run_cycle(&self) {
        run_cycle(&self.config, self.poller.as_ref(), self.reporter.as_ref()).await;
    }

    /// Start the scheduling loop in a background task. Calling it again while
    /// running has no effect.
    pub async fn start(&self) {
        let mut stop = self.stop.lock().await;
        if stop.is_some() {
            return;
        }

        let (tx, mut rx) = broadcast::channel(1);
        *stop = Some(tx);

        let config = self.config.clone();
        let poller = self.poller.clone();
        let reporter = self.reporter.clone();

        tracing::info!(
            agent = %config.name,
            endpoints = config.endpoints.len(),
            interval = ?config.query_interval(),
            "Starting agent scheduler"
        );

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.query_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        run_cycle(&config, poller.as_ref(), reporter.as_ref()).await;
                    }
                }
            }

            tracing::info!("Agent scheduler stopped");
        });

        *self.handle.lock().await = Some(handle);
    }

    /// Stop the loop. A cycle already in flight finishes first; its own
    /// timeouts bound how long that takes.
    pub async fn stop(&self) {
        if let Some(tx) = self.stop.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!("Agent scheduler task failed: {}", e);
            }
        }
    }
}

/// Poll every endpoint, then report the results. Errors are logged and the
/// cycle is dropped; nothing propagates to the caller.
async fn run_cycle(config: &AgentConfig, poller: &dyn Poller, reporter: &dyn Reporter) {
    tracing::debug!(count = config.endpoints.len(), "waking up to poll endpoints");

    let deadline = Instant::now() + config.poll_timeout();
    let results = poller.poll_all(&config.endpoints, deadline).await;

    tracing::debug!(successful_results = results.len(), "finished polling");

    let report_timeout = config.report_timeout();
    match tokio::time::timeout(report_timeout, reporter.report(results)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!("failed to report metrics, they will be discarded: {}", e);
        }
        Err(_) => {
            tracing::warn!(
                "report timed out after {:?}, metrics will be discarded",
                report_timeout
            );
        }
    }
}
