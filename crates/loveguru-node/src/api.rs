//! HTTP API for the chat node.
//!
//! Assembles the router from the real-time, health and metrics routes.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use loveguru_realtime::{HubManager, OriginPolicy};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::health::health_routes;
use crate::observability::MetricsState;
use crate::realtime_api::realtime_routes;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Sharded chat hub.
    pub hubs: Arc<HubManager>,
    /// Prometheus export.
    pub metrics: MetricsState,
    /// Browser origins admitted to the WebSocket endpoint.
    pub origins: Arc<OriginPolicy>,
}

impl AppState {
    pub fn new(hubs: Arc<HubManager>, origins: OriginPolicy) -> Self {
        Self {
            hubs,
            metrics: MetricsState::new(),
            origins: Arc::new(origins),
        }
    }
}

/// Creates the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(realtime_routes())
        .merge(health_routes())
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Prometheus scrape endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let stats = state.hubs.stats().await;
    state
        .metrics
        .refresh(&state.hubs.metrics(), &state.hubs.shard_metrics(), stats);

    match state.metrics.encode() {
        Ok(body) => (
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
