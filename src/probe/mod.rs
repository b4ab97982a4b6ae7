//! Endpoint polling for the agent.
//!
//! Endpoints are queried concurrently; the addressed JSON value of each
//! successful response becomes one poll result.

mod extract;
mod http;

pub use extract::*;
pub use http::*;

use crate::config::EndpointSpec;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Probe error types. Every variant causes the endpoint to be omitted from
/// the cycle's results.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("non-2xx HTTP status code: {0}")]
    Status(u16),
    #[error("invalid JSON response: {0}")]
    Decode(String),
    #[error("JSON path not found in response: {0}")]
    PathNotFound(String),
    #[error("value {value:?} is not a valid {expected}")]
    TypeMismatch { value: String, expected: String },
}

/// The value extracted from one endpoint during one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub endpoint: EndpointSpec,
    pub value: String,
}

/// Capability to poll a set of endpoints.
#[async_trait]
pub trait Poller: Send + Sync {
    /// Poll every endpoint concurrently, returning once all polls have
    /// finished or `deadline` has passed. Failed endpoints are logged and
    /// omitted; the map is keyed by endpoint name.
    async fn poll_all(
        &self,
        endpoints: &[EndpointSpec],
        deadline: Instant,
    ) -> HashMap<String, PollResult>;
}
