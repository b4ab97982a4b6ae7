//! Wire types shared by the agent and the aggregator.
//!
//! The report payload and the dot-segmented metric naming convention form the
//! contract between the two processes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Suffix of the synthetic liveness metric every agent reports.
pub const HEARTBEAT_SUFFIX: &str = "Active";

/// Separator between metric name segments.
pub const NAME_SEPARATOR: char = '.';

/// Header carrying the shared static key on agent reports.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Scalar type of a metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Uint64,
    String,
    Bool,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Uint64 => "uint64",
            MetricType::String => "string",
            MetricType::Bool => "bool",
        }
    }

    /// Whether a string-encoded value is a valid rendition of this type.
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            MetricType::Uint64 => value.parse::<u64>().is_ok(),
            MetricType::String => true,
            MetricType::Bool => value == "true" || value == "false",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown metric type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric type: {0}")]
pub struct UnknownMetricType(pub String);

impl FromStr for MetricType {
    type Err = UnknownMetricType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uint64" => Ok(MetricType::Uint64),
            "string" => Ok(MetricType::String),
            "bool" => Ok(MetricType::Bool),
            other => Err(UnknownMetricType(other.to_string())),
        }
    }
}

/// One metric entry of a report.
///
/// Fields are loosely typed and default when absent, so that a single bad
/// entry can be skipped without rejecting the whole report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPayload {
    #[serde(default)]
    pub value: String,
    #[serde(rename = "type", default)]
    pub metric_type: String,
    #[serde(rename = "numAggregation", default)]
    pub num_aggregation: i64,
}

/// Body of `POST /api/report`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub metrics: HashMap<String, MetricPayload>,
}

/// Name of the heartbeat metric for the given agent.
pub fn heartbeat_name(agent_name: &str) -> String {
    format!("{}{}{}", agent_name, NAME_SEPARATOR, HEARTBEAT_SUFFIX)
}
