//! `GET /admin/system-logs` — in-process ring buffer, newest first
//! (`§4.6`).

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::state::AppState;

use super::AdminGuard;

pub async fn system_logs(_guard: AdminGuard, State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "logs": state.system_log.snapshot() }))
}
