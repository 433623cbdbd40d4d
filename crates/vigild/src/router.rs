//! HTTP surface of the daemon.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Daemon liveness and configured probe count |

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use serde_json::json;

use vigil_metrics::MetricsCollector;

/// Shared state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<MetricsCollector>,
}

pub fn build_router(collector: Arc<MetricsCollector>) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .route("/healthz", get(healthz))
        .with_state(AppState { collector })
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshots = state.collector.snapshot().await;
    let body = vigil_metrics::render_prometheus(&snapshots);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// GET /healthz
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let probes = state.collector.registered_probes().await;
    Json(json!({
        "status": "ok",
        "probes": probes.len(),
    }))
}
