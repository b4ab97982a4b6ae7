//! Configuration for the agent and the aggregator.
//!
//! Both processes read environment variables with sensible defaults. The agent
//! additionally reads its endpoint list from a JSON file.

use crate::protocol::MetricType;

use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to decode config file: {0}")]
    Decode(#[from] serde_json::Error),
}

fn invalid(name: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name: name.into(),
        reason: reason.into(),
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Aggregator configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Socket address the HTTP server binds to (default: "0.0.0.0:8080")
    pub listen_address: String,
    /// Path to the SQLite database file (default: "data/metrics.db")
    pub db_path: String,
    /// Age after which values are swept, in seconds (default: 7 days)
    pub retention_seconds: u64,
    /// Shared static key agents present on reports
    pub service_key: String,
    /// Operator login
    pub auth_username: String,
    pub auth_password: String,
    /// How long in-flight requests may run after shutdown is requested
    pub drain_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
            db_path: "data/metrics.db".to_string(),
            retention_seconds: 604_800,
            service_key: String::new(),
            auth_username: String::new(),
            auth_password: String::new(),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl AggregatorConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `APIMON_LISTEN_ADDRESS`: bind address (default: 0.0.0.0:8080)
    /// - `APIMON_DB_PATH`: database file path (default: data/metrics.db)
    /// - `APIMON_RETENTION_SECONDS`: value TTL (default: 604800)
    /// - `APIMON_SERVICE_KEY`: shared agent key (required)
    /// - `APIMON_AUTH_USERNAME` / `APIMON_AUTH_PASSWORD`: operator login (required)
    /// - `APIMON_DRAIN_TIMEOUT_SECONDS`: shutdown drain timeout (default: 5)
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(addr) = lookup("APIMON_LISTEN_ADDRESS") {
            cfg.listen_address = addr;
        }

        if let Some(db_path) = lookup("APIMON_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(raw) = lookup("APIMON_RETENTION_SECONDS") {
            cfg.retention_seconds = raw
                .parse()
                .map_err(|_| invalid("APIMON_RETENTION_SECONDS", "not an unsigned integer"))?;
        }

        if let Some(raw) = lookup("APIMON_DRAIN_TIMEOUT_SECONDS") {
            let secs: u64 = raw
                .parse()
                .map_err(|_| invalid("APIMON_DRAIN_TIMEOUT_SECONDS", "not an unsigned integer"))?;
            cfg.drain_timeout = Duration::from_secs(secs);
        }

        cfg.service_key = lookup("APIMON_SERVICE_KEY").unwrap_or_default();
        cfg.auth_username = lookup("APIMON_AUTH_USERNAME").unwrap_or_default();
        cfg.auth_password = lookup("APIMON_AUTH_PASSWORD").unwrap_or_default();

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_key.is_empty() {
            return Err(ConfigError::Missing("APIMON_SERVICE_KEY"));
        }
        if self.auth_username.is_empty() {
            return Err(ConfigError::Missing("APIMON_AUTH_USERNAME"));
        }
        if self.auth_password.is_empty() {
            return Err(ConfigError::Missing("APIMON_AUTH_PASSWORD"));
        }
        if self.retention_seconds == 0 {
            return Err(invalid("APIMON_RETENTION_SECONDS", "must be positive"));
        }
        Ok(())
    }
}

// ============================================================================
// Agent
// ============================================================================

/// A single endpoint the agent polls. One endpoint maps to one metric name.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EndpointSpec {
    /// Globally unique metric name, e.g. `VM1.Node1.nonce`
    pub name: String,
    pub url: String,
    /// Dot-path into the JSON response
    pub value_path: String,
    #[serde(rename = "type")]
    pub value_type: MetricType,
    /// Number of historical samples the aggregator keeps
    pub retention_count: u32,
}

/// Bounds for the agent's interval and timeouts.
const MIN_PERIOD: Duration = Duration::from_millis(1);
const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn check_period(field: &str, secs: f64) -> Result<(), ConfigError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if (MIN_PERIOD..=MAX_PERIOD).contains(&d) => Ok(()),
        _ => Err(invalid(
            field,
            format!(
                "must be between {} and {} seconds",
                MIN_PERIOD.as_secs_f64(),
                MAX_PERIOD.as_secs()
            ),
        )),
    }
}

fn clamp_period(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs)
        .unwrap_or(MAX_PERIOD)
        .clamp(MIN_PERIOD, MAX_PERIOD)
}

fn default_query_interval() -> f64 {
    60.0
}

fn default_sub_timeout() -> f64 {
    10.0
}

/// Agent configuration. Read from a JSON file; the service key comes from the
/// environment.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Agent name, used as the heartbeat metric prefix
    pub name: String,
    /// Full URL of the aggregator report endpoint
    pub report_endpoint: String,
    #[serde(default = "default_query_interval")]
    pub query_interval_seconds: f64,
    #[serde(default = "default_sub_timeout")]
    pub poll_timeout_seconds: f64,
    #[serde(default = "default_sub_timeout")]
    pub report_timeout_seconds: f64,
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
    #[serde(skip)]
    pub service_key: String,
}

impl AgentConfig {
    /// Load configuration from the file named by `APIMON_AGENT_CONFIG`
    /// (default: agent.json) and the key in `APIMON_SERVICE_KEY`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("APIMON_AGENT_CONFIG").unwrap_or_else(|_| "agent.json".to_string());
        let key = env::var("APIMON_SERVICE_KEY").unwrap_or_default();
        Self::from_file(path, key)
    }

    pub fn from_file<P: AsRef<Path>>(path: P, service_key: String) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&data, service_key)
    }

    pub fn from_json(data: &str, service_key: String) -> Result<Self, ConfigError> {
        let mut cfg: AgentConfig = serde_json::from_str(data)?;
        cfg.service_key = service_key;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn query_interval(&self) -> Duration {
        clamp_period(self.query_interval_seconds)
    }

    pub fn poll_timeout(&self) -> Duration {
        clamp_period(self.poll_timeout_seconds)
    }

    pub fn report_timeout(&self) -> Duration {
        clamp_period(self.report_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Missing("name"));
        }
        if self.report_endpoint.is_empty() {
            return Err(ConfigError::Missing("report_endpoint"));
        }
        if self.service_key.is_empty() {
            return Err(ConfigError::Missing("APIMON_SERVICE_KEY"));
        }
        check_period("query_interval_seconds", self.query_interval_seconds)?;
        for (field, value) in [
            ("poll_timeout_seconds", self.poll_timeout_seconds),
            ("report_timeout_seconds", self.report_timeout_seconds),
        ] {
            check_period(field, value)?;
            // A cycle must always finish before the next tick.
            if value >= self.query_interval_seconds {
                return Err(invalid(field, "must be smaller than query_interval_seconds"));
            }
        }

        let mut seen = HashSet::with_capacity(self.endpoints.len());
        for ep in &self.endpoints {
            if ep.name.is_empty() {
                return Err(invalid("endpoints.name", "must not be empty"));
            }
            if !seen.insert(ep.name.as_str()) {
                return Err(invalid(
                    format!("endpoints.{}", ep.name),
                    "duplicate endpoint name",
                ));
            }
            if ep.url.is_empty() {
                return Err(invalid(format!("endpoints.{}.url", ep.name), "must not be empty"));
            }
            if ep.value_path.is_empty() {
                return Err(invalid(
                    format!("endpoints.{}.value_path", ep.name),
                    "must not be empty",
                ));
            }
            if ep.retention_count == 0 {
                return Err(invalid(
                    format!("endpoints.{}.retention_count", ep.name),
                    "must be at least 1",
                ));
            }
        }

        Ok(())
    }
}
