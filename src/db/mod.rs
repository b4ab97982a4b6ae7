//! Database module.
//!
//! Metric definitions and metric values live in separate tables so that both
//! retention mechanisms only ever prune values.

mod models;
mod store;

pub use models::*;
pub use store::*;

use crate::protocol::MetricType;
use std::collections::HashMap;

/// Capability to persist and query metrics.
///
/// All mutation of shared state goes through these operations; writes are
/// serialized by the implementation.
pub trait MetricStore: Send + Sync {
    /// Upsert the definition, append the value and trim the metric to its
    /// `num_aggregation` most recent values, atomically.
    fn save_metric(
        &self,
        name: &str,
        metric_type: MetricType,
        num_aggregation: u32,
        value: &str,
        recorded_at: i64,
    ) -> Result<(), DbError>;

    /// Every definition with its single most recent value, if any.
    fn get_latest_metrics(&self) -> Result<Vec<LatestMetric>, DbError>;

    /// The definition and all retained values ascending by time.
    /// Fails with [`DbError::NotFound`] if the definition does not exist.
    fn get_metric_history(&self, name: &str) -> Result<MetricHistory, DbError>;

    /// Remove a definition and all its values. Deleting an unknown name is not an error.
    fn delete_metric(&self, name: &str) -> Result<(), DbError>;

    fn update_metric_order(&self, name: &str, order: i64) -> Result<(), DbError>;

    fn update_panel_order(&self, panel: &str, order: i64) -> Result<(), DbError>;

    fn get_panel_orders(&self) -> Result<HashMap<String, i64>, DbError>;

    /// Delete every value recorded strictly before `cutoff` (unix seconds).
    /// Returns the number of rows removed.
    fn delete_values_before(&self, cutoff: i64) -> Result<usize, DbError>;
}
