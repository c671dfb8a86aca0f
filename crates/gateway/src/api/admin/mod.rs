pub mod config;
pub mod group_policies;
pub mod guard;
pub mod health;
pub mod performance;
pub mod policies;
pub mod stats;
pub mod system_logs;
pub mod usage;
pub mod users;

pub use guard::AdminGuard;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

/// Shared 500 mapping for the admin surface's storage-backed handlers.
pub(crate) fn storage_error(err: lgw_storage::StorageError) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}
