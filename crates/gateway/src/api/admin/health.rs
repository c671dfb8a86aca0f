//! `GET /admin/health` — checks `AuditStore`, the external UI datastore,
//! and `QuotaStore` (`§4.6`).

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lgw_domain::model::USAGE_QUEUE_KEY;
use serde::Serialize;

use crate::state::AppState;

use super::AdminGuard;

#[derive(Serialize)]
struct CheckResult {
    ok: bool,
    detail: String,
}

pub async fn health(_guard: AdminGuard, State(state): State<AppState>) -> Response {
    let audit_ok = state.audit.health_check().await;
    let webui_ok = state.webui.health_check().await;
    let quota_ok = state.quota.ping().await;
    let queue_len = state.quota.queue_len(USAGE_QUEUE_KEY).await.unwrap_or(-1);

    let checks = [
        (
            "audit_store",
            CheckResult {
                ok: audit_ok,
                detail: if audit_ok { "ok".to_string() } else { "unreachable".to_string() },
            },
        ),
        (
            "webui_store",
            CheckResult {
                ok: webui_ok,
                detail: if webui_ok { "ok".to_string() } else { "unreachable".to_string() },
            },
        ),
        (
            "quota_store",
            CheckResult {
                ok: quota_ok,
                detail: format!("ping={quota_ok} usage_queue_len={queue_len}"),
            },
        ),
    ];

    let overall = if checks.iter().all(|(_, c)| c.ok) { "ok" } else { "degraded" };

    Json(serde_json::json!({
        "status": overall,
        "checks": checks.into_iter().map(|(name, c)| (name, c)).collect::<std::collections::BTreeMap<_, _>>(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
    .into_response()
}
