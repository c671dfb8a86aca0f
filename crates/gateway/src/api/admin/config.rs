//! `GET/POST /admin/config` — runtime config reads and hot-reload writes
//! (`§4.7`).

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::config_bus;
use crate::state::AppState;

use super::AdminGuard;

pub async fn get_config(_guard: AdminGuard, State(state): State<AppState>) -> Response {
    let rows = match state.audit.list_system_config().await {
        Ok(rows) => rows,
        Err(err) => return super::storage_error(err),
    };
    let last_updated = rows.iter().map(|r| r.updated_at).max();
    let config = state.config_snapshot();

    Json(serde_json::json!({
        "config": config.as_map(),
        "masked": config.masked(),
        "last_updated": last_updated,
    }))
    .into_response()
}

#[derive(Deserialize)]
pub struct UpdateConfig {
    pub config: BTreeMap<String, String>,
}

pub async fn post_config(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Json(body): Json<UpdateConfig>,
) -> Response {
    let rows = match state.audit.list_system_config().await {
        Ok(rows) => rows,
        Err(err) => return super::storage_error(err),
    };
    let mut merged =
        lgw_domain::config::RuntimeConfig::from_map(rows.into_iter().map(|r| (r.key, r.value)).collect());
    let changed = merged.merge(&body.config);

    let missing = merged.missing_required();
    if !missing.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "Missing required config",
                "missing": missing,
            })),
        )
            .into_response();
    }

    if let Err(err) = state.audit.upsert_system_config(merged.as_map()).await {
        return super::storage_error(err);
    }

    *state.config.write() = merged;

    if let Err(err) = config_bus::publish_change(&state.quota, &changed).await {
        state
            .system_log
            .warn(format!("config bus publish failed: {err}"));
    }

    Json(serde_json::json!({ "success": true, "changed": changed })).into_response()
}

