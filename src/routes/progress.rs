use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::models::progress::ProgressSnapshot;

/// GET /api/v1/progress: live batch progress and per-worker state.
pub async fn get_progress(State(state): State<AppState>) -> Json<ProgressSnapshot> {
    Json(state.board.snapshot())
}
