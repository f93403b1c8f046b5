use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub workers_alive: usize,
    pub completed: usize,
    pub total: usize,
}

/// GET /health returns degraded once every worker has stopped with listings left.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let snapshot = state.board.snapshot();
    let stalled = !snapshot.workers.is_empty()
        && snapshot.workers_alive == 0
        && snapshot.completed < snapshot.total;

    let (status_code, status) = if stalled {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::OK, "ok")
    };

    let response = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        workers_alive: snapshot.workers_alive,
        completed: snapshot.completed,
        total: snapshot.total,
    };

    (status_code, Json(response))
}
