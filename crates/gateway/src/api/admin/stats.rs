//! `GET /admin/stats` — aggregate totals, last-24h totals and latency
//! percentiles, top-5 models and users (`§4.6`).

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};

use crate::state::AppState;

use super::performance::percentile;
use super::AdminGuard;

const TOP_N: i64 = 5;

pub async fn stats(_guard: AdminGuard, State(state): State<AppState>) -> Response {
    let since_24h = Utc::now() - Duration::hours(24);

    let all_time = match state.audit.usage_totals(None).await {
        Ok(totals) => totals,
        Err(err) => return super::storage_error(err),
    };
    let last_24h = match state.audit.usage_totals(Some(since_24h)).await {
        Ok(totals) => totals,
        Err(err) => return super::storage_error(err),
    };
    let top_models = match state.audit.top_models(since_24h, TOP_N).await {
        Ok(rows) => rows,
        Err(err) => return super::storage_error(err),
    };
    let top_users = match state.audit.top_users(since_24h, TOP_N).await {
        Ok(rows) => rows,
        Err(err) => return super::storage_error(err),
    };
    let latency_samples = match state.audit.latency_samples(since_24h).await {
        Ok(rows) => rows,
        Err(err) => return super::storage_error(err),
    };

    Json(serde_json::json!({
        "all_time": {
            "total_tokens": all_time.total_tokens,
            "total_cost": all_time.total_cost,
            "request_count": all_time.request_count,
        },
        "last_24h": {
            "total_tokens": last_24h.total_tokens,
            "total_cost": last_24h.total_cost,
            "request_count": last_24h.request_count,
            "p50_latency_ms": percentile(&latency_samples, 0.50),
            "p95_latency_ms": percentile(&latency_samples, 0.95),
            "p99_latency_ms": percentile(&latency_samples, 0.99),
        },
        "top_models": top_models.iter().map(|(m, t)| serde_json::json!({ "model": m, "tokens": t })).collect::<Vec<_>>(),
        "top_users": top_users.iter().map(|(u, t)| serde_json::json!({ "user_id": u, "tokens": t })).collect::<Vec<_>>(),
    }))
    .into_response()
}

