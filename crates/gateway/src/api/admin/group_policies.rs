//! `GET/POST /admin/group-policies`, `DELETE /admin/group-policies/:name`,
//! and `GET /admin/openwebui-groups` (`§4.6`).

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::state::AppState;

use super::AdminGuard;

pub async fn list_group_policies(_guard: AdminGuard, State(state): State<AppState>) -> Response {
    match state.audit.list_group_policies().await {
        Ok(rows) => Json(serde_json::json!({ "group_policies": rows })).into_response(),
        Err(err) => super::storage_error(err),
    }
}

#[derive(Deserialize)]
pub struct UpsertGroupPolicy {
    pub group_name: String,
    pub policy_id: String,
    #[serde(default)]
    pub priority: i32,
}

pub async fn upsert_group_policy(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Json(body): Json<UpsertGroupPolicy>,
) -> Response {
    match state
        .audit
        .upsert_group_policy(&body.group_name, &body.policy_id, body.priority)
        .await
    {
        Ok(row) => {
            state.cache.invalidate_group_policies();
            Json(serde_json::json!({ "group_policy": row })).into_response()
        }
        Err(err) => super::storage_error(err),
    }
}

pub async fn delete_group_policy(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(group_name): Path<String>,
) -> Response {
    match state.audit.delete_group_policy(&group_name).await {
        Ok(deleted) => {
            if deleted {
                state.cache.invalidate_group_policies();
            }
            Json(serde_json::json!({ "success": deleted })).into_response()
        }
        Err(err) => super::storage_error(err),
    }
}

pub async fn list_openwebui_groups(_guard: AdminGuard, State(state): State<AppState>) -> Response {
    match state.webui.list_group_names().await {
        Ok(names) => Json(serde_json::json!({ "groups": names })).into_response(),
        Err(err) => super::storage_error(err),
    }
}

