//! Test doubles for the store, poller and reporter, plus helpers for
//! throwaway HTTP servers.

use crate::config::EndpointSpec;
use crate::db::{DbError, LatestMetric, MetricHistory, MetricStore};
use crate::probe::{PollResult, Poller};
use crate::protocol::MetricType;
use crate::report::{ReportError, Reporter};

use async_trait::async_trait;
use axum::Router;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A local URL nothing is listening on.
pub async fn refused_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SavedMetric {
    pub name: String,
    pub metric_type: MetricType,
    pub num_aggregation: u32,
    pub value: String,
    pub recorded_at: i64,
}

/// Store double that records calls. With `fail` set every operation errors;
/// with `fail_on` set only saves for that name error.
#[derive(Default)]
pub struct StubStore {
    pub fail: bool,
    pub fail_on: Option<String>,
    saves: Mutex<Vec<SavedMetric>>,
    sweep_cutoffs: Mutex<Vec<i64>>,
}

impl StubStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn failing_on(name: &str) -> Self {
        Self {
            fail_on: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn saves(&self) -> Vec<SavedMetric> {
        self.saves.lock().unwrap().clone()
    }

    pub fn sweep_cutoffs(&self) -> Vec<i64> {
        self.sweep_cutoffs.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), DbError> {
        if self.fail {
            return Err(stub_error());
        }
        Ok(())
    }
}

fn stub_error() -> DbError {
    DbError::Io(std::io::Error::new(std::io::ErrorKind::Other, "stub db error"))
}

impl MetricStore for StubStore {
    fn save_metric(
        &self,
        name: &str,
        metric_type: MetricType,
        num_aggregation: u32,
        value: &str,
        recorded_at: i64,
    ) -> Result<(), DbError> {
        self.check()?;
        if self.fail_on.as_deref() == Some(name) {
            return Err(stub_error());
        }
        self.saves.lock().unwrap().push(SavedMetric {
            name: name.to_string(),
            metric_type,
            num_aggregation,
            value: value.to_string(),
            recorded_at,
        });
        Ok(())
    }

    fn get_latest_metrics(&self) -> Result<Vec<LatestMetric>, DbError> {
        self.check()?;
        Ok(Vec::new())
    }

    fn get_metric_history(&self, _name: &str) -> Result<MetricHistory, DbError> {
        self.check()?;
        Err(DbError::NotFound)
    }

    fn delete_metric(&self, _name: &str) -> Result<(), DbError> {
        self.check()
    }

    fn update_metric_order(&self, _name: &str, _order: i64) -> Result<(), DbError> {
        self.check()
    }

    fn update_panel_order(&self, _panel: &str, _order: i64) -> Result<(), DbError> {
        self.check()
    }

    fn get_panel_orders(&self) -> Result<HashMap<String, i64>, DbError> {
        self.check()?;
        Ok(HashMap::new())
    }

    fn delete_values_before(&self, cutoff: i64) -> Result<usize, DbError> {
        self.sweep_cutoffs.lock().unwrap().push(cutoff);
        self.check()?;
        Ok(0)
    }
}

// ============================================================================
// Poller
// ============================================================================

/// Poller double returning a fixed result set.
pub struct StubPoller {
    results: HashMap<String, PollResult>,
    calls: AtomicUsize,
    last_deadline: Mutex<Option<Instant>>,
}

impl StubPoller {
    pub fn new(results: HashMap<String, PollResult>) -> Self {
        Self {
            results,
            calls: AtomicUsize::new(0),
            last_deadline: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_deadline(&self) -> Option<Instant> {
        *self.last_deadline.lock().unwrap()
    }
}

#[async_trait]
impl Poller for StubPoller {
    async fn poll_all(
        &self,
        _endpoints: &[EndpointSpec],
        deadline: Instant,
    ) -> HashMap<String, PollResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_deadline.lock().unwrap() = Some(deadline);
        self.results.clone()
    }
}

// ============================================================================
// Reporters
// ============================================================================

/// Reporter double that records every result set it is handed.
#[derive(Default)]
pub struct RecordingReporter {
    fail: bool,
    reported: Mutex<Vec<HashMap<String, PollResult>>>,
}

impl RecordingReporter {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.reported.lock().unwrap().len()
    }

    pub fn reported(&self) -> Vec<HashMap<String, PollResult>> {
        self.reported.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn report(&self, results: HashMap<String, PollResult>) -> Result<(), ReportError> {
        self.reported.lock().unwrap().push(results);
        if self.fail {
            return Err(ReportError::Rejected(500));
        }
        Ok(())
    }
}

/// Reporter double that never completes.
pub struct HangingReporter;

#[async_trait]
impl Reporter for HangingReporter {
    async fn report(&self, _results: HashMap<String, PollResult>) -> Result<(), ReportError> {
        std::future::pending().await
    }
}
