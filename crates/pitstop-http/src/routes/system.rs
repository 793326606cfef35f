//! System and health endpoints.

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::state::AppState;
use crate::types::HealthResponse;

/// Check server health.
///
/// Pings the counter store. Admission fails closed without it, so an
/// unreachable store reports the server as degraded.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Server and counter store are healthy", body = HealthResponse),
        (status = 503, description = "Counter store unreachable", body = HealthResponse),
    ),
    tag = "System"
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (code, status, store) = match state.store_health().await {
        Ok(()) => (StatusCode::OK, "ok", "ok"),
        Err(e) => {
            tracing::error!(
                event = "health.store_unreachable",
                error = %e,
                "Counter store health check failed",
            );
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", "unreachable")
        }
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: store.to_string(),
            uptime_seconds: state.uptime_secs(),
        }),
    )
}

/// Prometheus-compatible metrics endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics().render(state.uptime_secs());

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}
