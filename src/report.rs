//! Delivery of poll results to the aggregator.

use crate::probe::PollResult;
use crate::protocol::{heartbeat_name, MetricPayload, MetricType, ReportPayload, API_KEY_HEADER};

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Report error types. A failed report is dropped, never retried.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("failed to serialize report payload: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("report timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error sending report: {0}")]
    Network(String),
    #[error("server rejected report with status code: {0}")]
    Rejected(u16),
}

/// Capability to deliver one cycle's results.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, results: HashMap<String, PollResult>) -> Result<(), ReportError>;
}

/// Build the payload for one cycle: every poll result plus the heartbeat.
pub fn build_payload(agent_name: &str, results: &HashMap<String, PollResult>) -> ReportPayload {
    let mut metrics = HashMap::with_capacity(results.len() + 1);

    for (name, result) in results {
        metrics.insert(
            name.clone(),
            MetricPayload {
                value: result.value.clone(),
                metric_type: result.endpoint.value_type.to_string(),
                num_aggregation: i64::from(result.endpoint.retention_count),
            },
        );
    }

    // Inserted last so it wins over any endpoint that happens to share the name.
    metrics.insert(
        heartbeat_name(agent_name),
        MetricPayload {
            value: "true".to_string(),
            metric_type: MetricType::Bool.to_string(),
            num_aggregation: 1,
        },
    );

    ReportPayload { metrics }
}

/// Posts reports as JSON to the aggregator.
pub struct HttpReporter {
    endpoint: String,
    api_key: String,
    agent_name: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpReporter {
    pub fn new(
        endpoint: &str,
        api_key: &str,
        agent_name: &str,
        timeout: Duration,
    ) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReportError::Client(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            agent_name: agent_name.to_string(),
            timeout,
            client,
        })
    }
}

#[async_trait]
impl Reporter for HttpReporter {
    async fn report(&self, results: HashMap<String, PollResult>) -> Result<(), ReportError> {
        let payload = build_payload(&self.agent_name, &results);
        let body = serde_json::to_vec(&payload)?;

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(API_KEY_HEADER, &self.api_key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReportError::Timeout(self.timeout)
                } else {
                    ReportError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReportError::Rejected(status.as_u16()));
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            metrics_count = payload.metrics.len(),
            "sent metrics report"
        );

        Ok(())
    }
}
