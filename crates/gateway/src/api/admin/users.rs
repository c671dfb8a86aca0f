//! `GET /admin/users`, `PATCH /admin/users/:id` (`§4.6`).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::policy::resolve_effective_policy;
use crate::state::AppState;

use super::AdminGuard;

#[derive(Serialize)]
pub struct UserView {
    pub id: String,
    pub is_active: bool,
    pub policy_id: String,
    pub groups: Vec<String>,
    pub effective_policy_id: String,
}

pub async fn list_users(_guard: AdminGuard, State(state): State<AppState>) -> impl IntoResponse {
    let users = match state.audit.list_users().await {
        Ok(users) => users,
        Err(err) => return super::storage_error(err),
    };
    let group_policies = match state.audit.list_group_policies().await {
        Ok(rows) => rows,
        Err(err) => return super::storage_error(err),
    };

    let mut views = Vec::with_capacity(users.len());
    for user in users {
        let groups = state.webui.groups_for_user(&user.id).await.unwrap_or_default();
        let effective_policy_id = resolve_effective_policy(&user.policy_id, &groups, &group_policies);
        views.push(UserView {
            id: user.id,
            is_active: user.is_active != 0,
            policy_id: user.policy_id,
            groups,
            effective_policy_id,
        });
    }
    Json(serde_json::json!({ "users": views })).into_response()
}

#[derive(Deserialize)]
pub struct PatchUser {
    pub is_active: Option<bool>,
    pub policy_id: Option<String>,
}

pub async fn patch_user(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<PatchUser>,
) -> impl IntoResponse {
    match state
        .audit
        .update_user(&id, patch.is_active, patch.policy_id.as_deref())
        .await
    {
        Ok(Some(user)) => {
            state.cache.invalidate_user(&id);
            Json(serde_json::json!({ "user": user })).into_response()
        }
        Ok(None) => (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": "user not found" })))
            .into_response(),
        Err(err) => super::storage_error(err),
    }
}
