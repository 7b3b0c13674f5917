//! HTTP routes for the metrics endpoint.
//!
//! - `GET /metrics`: Prometheus text exposition
//! - `GET /health`: liveness with the pending correlation count

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::correlation::CorrelationTable;
use crate::stats::Statistics;

// ============================================================================
// State
// ============================================================================

/// Shared state for the metrics HTTP server.
pub struct MetricsState {
    pub stats: Arc<Statistics>,
    pub correlation: Arc<CorrelationTable>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    pending_correlations: usize,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "coc-relay",
        version: env!("CARGO_PKG_VERSION"),
        pending_correlations: state.correlation.pending(),
    })
}

async fn metrics(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    match state.stats.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain")],
            e.to_string(),
        ),
    }
}

/// Build the metrics router.
pub fn build_router(state: Arc<MetricsState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
}

/// Serve the metrics router in the background.
///
/// Bind or serve failures are logged; alert handling never depends on them.
pub fn spawn_metrics_server(addr: SocketAddr, router: Router) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(%addr, error = %e, "Failed to start metrics server");
                return;
            }
        };

        tracing::info!(%addr, "Metrics server listening");

        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Metrics server stopped");
        }
    })
}
