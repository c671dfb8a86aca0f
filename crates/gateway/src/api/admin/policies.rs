//! `GET/POST /admin/policies`, `DELETE /admin/policies/:id` (`§4.6`).

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::state::AppState;

use super::AdminGuard;

pub async fn list_policies(_guard: AdminGuard, State(state): State<AppState>) -> Response {
    match state.audit.list_policies().await {
        Ok(policies) => Json(serde_json::json!({ "policies": policies })).into_response(),
        Err(err) => super::storage_error(err),
    }
}

#[derive(Deserialize)]
pub struct UpsertPolicy {
    pub id: String,
    pub name: String,
    pub daily_token_limit: i64,
    pub monthly_token_limit: i64,
    pub allowed_models: String,
}

pub async fn upsert_policy(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Json(body): Json<UpsertPolicy>,
) -> Response {
    match state
        .audit
        .upsert_policy(
            &body.id,
            &body.name,
            body.daily_token_limit,
            body.monthly_token_limit,
            &body.allowed_models,
        )
        .await
    {
        Ok(policy) => {
            state.cache.invalidate_policy(&policy.id);
            Json(serde_json::json!({ "policy": policy })).into_response()
        }
        Err(err) => super::storage_error(err),
    }
}

pub async fn delete_policy(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.audit.delete_policy(&id).await {
        Ok(deleted) => {
            if deleted {
                state.cache.invalidate_policy(&id);
            }
            Json(serde_json::json!({ "success": deleted })).into_response()
        }
        Err(err) => super::storage_error(err),
    }
}

