pub mod admin;

use axum::http::StatusCode;
use axum::routing::{delete, get, patch};
use axum::Router;

use crate::proxy;
use crate::state::AppState;

async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Assembles the full route tree: the proxy surface, the admin surface,
/// and a bare liveness check. Mirrors the teacher's `router(state)` shape —
/// one function building the whole `Router<AppState>`.
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/users", get(admin::users::list_users))
        .route("/users/:id", patch(admin::users::patch_user))
        .route("/policies", get(admin::policies::list_policies).post(admin::policies::upsert_policy))
        .route("/policies/:id", delete(admin::policies::delete_policy))
        .route(
            "/group-policies",
            get(admin::group_policies::list_group_policies).post(admin::group_policies::upsert_group_policy),
        )
        .route(
            "/group-policies/:name",
            delete(admin::group_policies::delete_group_policy),
        )
        .route("/openwebui-groups", get(admin::group_policies::list_openwebui_groups))
        .route("/usage", get(admin::usage::latest_usage))
        .route("/stats", get(admin::stats::stats))
        .route("/performance", get(admin::performance::performance))
        .route("/health", get(admin::health::health))
        .route("/config", get(admin::config::get_config).post(admin::config::post_config))
        .route("/system-logs", get(admin::system_logs::system_logs));

    let proxy = Router::new().route("/*rest", axum::routing::any(proxy::handle));

    Router::new()
        .route("/health", get(liveness))
        .nest("/admin", admin)
        .nest("/v1", proxy)
        .with_state(state)
}
