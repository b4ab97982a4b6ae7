//! Retention manager for sweeping expired values.

use crate::db::{DbError, MetricStore};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// How often the sweep runs for a given TTL: a tenth of the TTL, at least a minute.
pub fn sweep_interval(ttl: Duration) -> Duration {
    std::cmp::max(ttl / 10, MIN_SWEEP_INTERVAL)
}

/// Delete every value older than `now - ttl`. Definitions are never touched.
pub fn sweep_expired(store: &dyn MetricStore, ttl: Duration, now: i64) -> Result<usize, DbError> {
    let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    let cutoff = now.saturating_sub(ttl_secs);
    store.delete_values_before(cutoff)
}

/// Manager for the periodic TTL sweep.
pub struct RetentionManager {
    store: Arc<dyn MetricStore>,
    ttl: Duration,
    stop: Mutex<Option<broadcast::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetentionManager {
    pub fn new(store: Arc<dyn MetricStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            stop: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Run the sweep once against the current wall-clock time.
    pub fn run_once(&self) -> Result<usize, DbError> {
        sweep_expired(self.store.as_ref(), self.ttl, Utc::now().timestamp())
    }

    /// Start the retention manager background task.
    pub async fn start(&self) {
        let mut stop = self.stop.lock().await;
        if stop.is_some() {
            return;
        }

        let (tx, mut rx) = broadcast::channel(1);
        *stop = Some(tx);

        let store = self.store.clone();
        let ttl = self.ttl;
        let period = sweep_interval(ttl);
        tracing::info!("RetentionManager: sweeping values older than {:?} every {:?}", ttl, period);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        match sweep_expired(store.as_ref(), ttl, Utc::now().timestamp()) {
                            Ok(deleted) => {
                                tracing::debug!("RetentionManager: removed {} expired values", deleted);
                            }
                            Err(e) => {
                                tracing::warn!("RetentionManager: failed to sweep expired values: {}", e);
                            }
                        }
                    }
                }
            }
        });

        *self.handle.lock().await = Some(handle);
    }

    /// Stop the retention manager and wait for its task to exit.
    pub async fn stop(&self) {
        if let Some(tx) = self.stop.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!("RetentionManager: task failed: {}", e);
            }
        }
    }
}
