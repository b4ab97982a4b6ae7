//! HTTP request handlers.

use super::{ApiError, AppState};
use crate::db::MetricHistory;
use crate::protocol::{MetricType, ReportPayload};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

fn ok() -> Json<OkResponse> {
    Json(OkResponse { ok: true })
}

// ============================================================================
// Agent: Report
// ============================================================================

/// Persist every entry of an agent report under one receive timestamp.
///
/// Entries with an unknown type or a retention window below one are skipped,
/// and a store failure for one entry does not stop the rest.
pub async fn handle_report(
    State(state): State<AppState>,
    payload: Result<Json<ReportPayload>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let Json(payload) = payload?;
    let recorded_at = Utc::now().timestamp();
    let received = payload.metrics.len();
    let mut saved = 0usize;

    for (name, metric) in payload.metrics {
        let metric_type: MetricType = match metric.metric_type.parse() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(metric = %name, "skipping report entry: {}", e);
                continue;
            }
        };

        let num_aggregation = match u32::try_from(metric.num_aggregation) {
            Ok(n) if n >= 1 => n,
            _ => {
                tracing::warn!(
                    metric = %name,
                    num_aggregation = metric.num_aggregation,
                    "skipping report entry: numAggregation must be at least 1"
                );
                continue;
            }
        };

        match state
            .store
            .save_metric(&name, metric_type, num_aggregation, &metric.value, recorded_at)
        {
            Ok(()) => saved += 1,
            Err(e) => tracing::error!(metric = %name, "failed to save metric: {}", e),
        }
    }

    tracing::debug!(received, saved, "processed report");
    Ok(ok())
}

// ============================================================================
// Operator: Login
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

pub async fn handle_login(
    State(state): State<AppState>,
    req: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(req) = req?;

    if !state.credentials.check_login(&req.username, &req.password) {
        tracing::warn!(username = %req.username, "rejected login");
        return Err(ApiError::Unauthorized("invalid credentials".to_string()));
    }

    let token = state
        .tokens
        .issue(&req.username, Utc::now().timestamp())
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(LoginResponse { token }))
}

// ============================================================================
// Operator: Metrics
// ============================================================================

/// One row of the latest-values listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRow {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub num_aggregation: u32,
    pub recorded_at: i64,
    pub display_order: i64,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub metrics: Vec<MetricRow>,
}

pub async fn handle_get_metrics(
    State(state): State<AppState>,
) -> Result<Json<MetricsResponse>, ApiError> {
    let metrics = state
        .store
        .get_latest_metrics()?
        .into_iter()
        .filter_map(|row| {
            let latest = row.latest?;
            Some(MetricRow {
                name: row.definition.name,
                value: latest.value,
                metric_type: row.definition.metric_type,
                num_aggregation: row.definition.num_aggregation,
                recorded_at: latest.recorded_at,
                display_order: row.definition.display_order,
            })
        })
        .collect();

    Ok(Json(MetricsResponse { metrics }))
}

pub async fn handle_get_metric_history(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MetricHistory>, ApiError> {
    Ok(Json(state.store.get_metric_history(&name)?))
}

pub async fn handle_delete_metric(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<OkResponse>, ApiError> {
    state.store.delete_metric(&name)?;
    tracing::info!(metric = %name, "deleted metric");
    Ok(ok())
}

// ============================================================================
// Operator: Ordering
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OrderRequest {
    pub order: i64,
}

#[derive(Debug, Serialize)]
pub struct PanelOrdersResponse {
    pub panels: HashMap<String, i64>,
}

pub async fn handle_update_metric_order(
    State(state): State<AppState>,
    Path(name): Path<String>,
    req: Result<Json<OrderRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let Json(req) = req?;
    state.store.update_metric_order(&name, req.order)?;
    Ok(ok())
}

pub async fn handle_get_panel_orders(
    State(state): State<AppState>,
) -> Result<Json<PanelOrdersResponse>, ApiError> {
    Ok(Json(PanelOrdersResponse {
        panels: state.store.get_panel_orders()?,
    }))
}

pub async fn handle_update_panel_order(
    State(state): State<AppState>,
    Path(panel): Path<String>,
    req: Result<Json<OrderRequest>, JsonRejection>,
) -> Result<Json<OkResponse>, ApiError> {
    let Json(req) = req?;
    state.store.update_panel_order(&panel, req.order)?;
    Ok(ok())
}
