//! Database model types.

use crate::protocol::MetricType;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;

/// Persisted configuration of a metric. Survives both retention mechanisms.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub num_aggregation: u32,
    pub display_order: i64,
}

/// A single recorded sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValue {
    pub value: String,
    /// Unix seconds
    pub recorded_at: i64,
}

/// A definition with its most recent value, if any remains.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestMetric {
    pub definition: MetricDefinition,
    pub latest: Option<MetricValue>,
}

/// A definition with all of its retained values, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricHistory {
    #[serde(flatten)]
    pub definition: MetricDefinition,
    pub history: Vec<MetricValue>,
}

impl ToSql for MetricType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for MetricType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}
