//! `GET /admin/usage` — latest 100 `UsageLog` rows (`§4.6`).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::AppState;

use super::AdminGuard;

const LATEST_LIMIT: i64 = 100;

pub async fn latest_usage(_guard: AdminGuard, State(state): State<AppState>) -> Response {
    match state.audit.latest_usage_logs(LATEST_LIMIT).await {
        Ok(rows) => Json(serde_json::json!({ "usage": rows })).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}
