//! Web server module.

mod auth;
mod handlers;

pub use auth::*;
pub use handlers::*;

use crate::config::AggregatorConfig;
use crate::db::{DbError, MetricStore};

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Server error types.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("token setup failed: {0}")]
    Token(#[from] TokenError),
    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Error returned by handlers and middleware, rendered as `{"error": msg}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound => ApiError::NotFound(e.to_string()),
            DbError::InvalidMetric(m) => ApiError::BadRequest(m),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(format!("invalid request body: {}", e.body_text()))
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetricStore>,
    pub tokens: Arc<TokenIssuer>,
    pub credentials: Arc<Credentials>,
}

/// Aggregator HTTP server.
pub struct Server {
    state: AppState,
    drain_timeout: Duration,
}

impl Server {
    /// Create a new server. A fresh token secret is derived here, so tokens
    /// never outlive the server that issued them.
    pub fn new(config: &AggregatorConfig, store: Arc<dyn MetricStore>) -> Result<Self, ServerError> {
        let tokens = TokenIssuer::new(&config.service_key)?;

        Ok(Self {
            state: AppState {
                store,
                tokens: Arc::new(tokens),
                credentials: Arc::new(Credentials {
                    service_key: config.service_key.clone(),
                    username: config.auth_username.clone(),
                    password: config.auth_password.clone(),
                }),
            },
            drain_timeout: config.drain_timeout,
        })
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        // Agents
        let agent = Router::new()
            .route("/report", post(handlers::handle_report))
            .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

        // Operators
        let operator = Router::new()
            .route("/metrics", get(handlers::handle_get_metrics))
            .route("/metrics/{name}", delete(handlers::handle_delete_metric))
            .route("/metrics/{name}/history", get(handlers::handle_get_metric_history))
            .route("/metrics/{name}/order", put(handlers::handle_update_metric_order))
            .route("/panels/order", get(handlers::handle_get_panel_orders))
            .route("/panels/{panel}/order", put(handlers::handle_update_panel_order))
            .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_token));

        let api = Router::new()
            .route("/auth/login", post(handlers::handle_login))
            .merge(agent)
            .merge(operator);

        Router::new()
            .nest("/api", api)
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(state)
    }

    /// Serve until `shutdown` resolves, then give in-flight requests up to the
    /// drain timeout before aborting them.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        tracing::info!("Web server listening on {}", listener.local_addr()?);

        let (drain_tx, drain_rx) = oneshot::channel::<()>();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = drain_rx.await;
                })
                .await
        });

        tokio::select! {
            joined = &mut server => return Ok(joined??),
            _ = shutdown => {}
        }

        tracing::info!("Shutting down, draining requests for up to {:?}", self.drain_timeout);
        let _ = drain_tx.send(());

        match tokio::time::timeout(self.drain_timeout, &mut server).await {
            Ok(joined) => Ok(joined??),
            Err(_) => {
                tracing::warn!("Drain timeout elapsed, aborting remaining connections");
                server.abort();
                Ok(())
            }
        }
    }
}
