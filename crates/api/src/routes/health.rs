//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use messaging::MessageBus;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub broker: &'static str,
}

/// GET /health — reports process liveness and broker connectivity.
pub async fn check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    if state.broker.is_available().await {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                broker: "connected",
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded",
                broker: "disconnected",
            }),
        )
    }
}
