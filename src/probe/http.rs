//! HTTP poller implementation.

use super::{extract, PollResult, Poller, ProbeError};
use crate::config::EndpointSpec;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Polls endpoints with HTTP GET and extracts the configured JSON value.
#[derive(Clone)]
pub struct HttpPoller {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpPoller {
    /// Create a poller whose individual requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Network(e.to_string()))?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Poller for HttpPoller {
    async fn poll_all(
        &self,
        endpoints: &[EndpointSpec],
        deadline: Instant,
    ) -> HashMap<String, PollResult> {
        let started = Instant::now();
        let results = Arc::new(Mutex::new(HashMap::with_capacity(endpoints.len())));
        let mut tasks = JoinSet::new();

        for endpoint in endpoints.iter().cloned() {
            let client = self.client.clone();
            let timeout = self.timeout;
            let results = results.clone();

            tasks.spawn(async move {
                let outcome = match tokio::time::timeout_at(
                    deadline,
                    poll_endpoint(&client, &endpoint, timeout),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ProbeError::Timeout(deadline.saturating_duration_since(started))),
                };

                match outcome {
                    Ok(value) => {
                        let mut map = results.lock().unwrap_or_else(PoisonError::into_inner);
                        map.insert(endpoint.name.clone(), PollResult { endpoint, value });
                    }
                    Err(e) => {
                        tracing::warn!(
                            name = %endpoint.name,
                            url = %endpoint.url,
                            error = %e,
                            "endpoint poll failed"
                        );
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("poll task failed: {}", e);
            }
        }

        let mut map = results.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *map)
    }
}

/// Query a single endpoint and return its extracted value.
async fn poll_endpoint(
    client: &reqwest::Client,
    endpoint: &EndpointSpec,
    timeout: Duration,
) -> Result<String, ProbeError> {
    let response = client.get(&endpoint.url).send().await.map_err(|e| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProbeError::Status(status.as_u16()));
    }

    let body = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    })?;

    let document: Value =
        serde_json::from_slice(&body).map_err(|e| ProbeError::Decode(e.to_string()))?;

    let value = extract(&document, &endpoint.value_path)
        .ok_or_else(|| ProbeError::PathNotFound(endpoint.value_path.clone()))?;

    if !endpoint.value_type.accepts(&value) {
        return Err(ProbeError::TypeMismatch {
            value,
            expected: endpoint.value_type.to_string(),
        });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MetricType;
    use crate::test_support::{refused_url, spawn_server};
    use axum::{http::StatusCode, routing::get, Json, Router};
    use serde_json::json;

    fn endpoint(name: &str, url: String, path: &str, value_type: MetricType) -> EndpointSpec {
        EndpointSpec {
            name: name.to_string(),
            url,
            value_path: path.to_string(),
            value_type,
            retention_count: 3,
        }
    }

    async fn fixture_server() -> String {
        let router = Router::new()
            .route(
                "/ok",
                get(|| async { Json(json!({"data": {"status": {"erd_nonce": 123456}}})) }),
            )
            .route(
                "/other",
                get(|| async { Json(json!({"data": {"different_status": {"erd_nonce": 1}}})) }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Json(json!({"data": {"status": {"erd_nonce": 7}}}))
                }),
            )
            .route(
                "/error",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            )
            .route(
                "/text",
                get(|| async { Json(json!({"data": {"status": {"erd_nonce": "abc"}}})) }),
            )
            .route("/html", get(|| async { "<html></html>" }));
        spawn_server(router).await
    }

    #[tokio::test]
    async fn test_poll_all_omits_failures() {
        let base = fixture_server().await;
        let path = "data.status.erd_nonce";
        let endpoints = vec![
            endpoint("Node1", format!("{}/ok", base), path, MetricType::Uint64),
            endpoint("Node2", format!("{}/other", base), path, MetricType::Uint64),
            endpoint("Node3", format!("{}/slow", base), path, MetricType::Uint64),
            endpoint("Node4", refused_url().await, path, MetricType::Uint64),
            endpoint("Node5", format!("{}/error", base), path, MetricType::Uint64),
            endpoint("Node6", format!("{}/text", base), path, MetricType::Uint64),
            endpoint("Node7", format!("{}/html", base), path, MetricType::String),
        ];

        let poller = HttpPoller::new(Duration::from_millis(500)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let results = poller.poll_all(&endpoints, deadline).await;

        assert_eq!(results.len(), 1);
        let res = &results["Node1"];
        assert_eq!(res.value, "123456");
        assert_eq!(res.endpoint.value_type, MetricType::Uint64);
    }

    #[tokio::test]
    async fn test_poll_all_respects_deadline() {
        let base = fixture_server().await;
        let path = "data.status.erd_nonce";
        let endpoints = vec![
            endpoint("fast", format!("{}/ok", base), path, MetricType::Uint64),
            endpoint("slow", format!("{}/slow", base), path, MetricType::Uint64),
        ];

        // Request timeout alone would let the slow endpoint finish.
        let poller = HttpPoller::new(Duration::from_secs(10)).unwrap();
        let started = Instant::now();
        let results = poller
            .poll_all(&endpoints, started + Duration::from_millis(300))
            .await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(results.len(), 1);
        assert!(results.contains_key("fast"));
    }

    #[tokio::test]
    async fn test_poll_all_string_value() {
        let base = fixture_server().await;
        let endpoints = vec![endpoint(
            "text",
            format!("{}/text", base),
            "data.status.erd_nonce",
            MetricType::String,
        )];

        let poller = HttpPoller::new(Duration::from_secs(1)).unwrap();
        let results = poller
            .poll_all(&endpoints, Instant::now() + Duration::from_secs(2))
            .await;
        assert_eq!(results["text"].value, "abc");
    }

    #[tokio::test]
    async fn test_poll_all_empty() {
        let poller = HttpPoller::new(Duration::from_secs(1)).unwrap();
        let results = poller.poll_all(&[], Instant::now()).await;
        assert!(results.is_empty());
    }
}
