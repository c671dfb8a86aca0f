//! `AdminGuard` — `FromRequestParts` extractor requiring `x-admin-key` to
//! equal the configured `ADMIN_API_KEY`, compared in constant time
//! (`§4.6`).

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub struct AdminGuard;

impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = (StatusCode, axum::Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let config = state.config_snapshot();
        let expected = config.admin_api_key().ok_or_else(unauthorized)?;

        let provided = parts
            .headers
            .get("x-admin-key")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(unauthorized)?;

        let expected_hash = Sha256::digest(expected.as_bytes());
        let provided_hash = Sha256::digest(provided.as_bytes());

        if expected_hash.ct_eq(&provided_hash).into() {
            Ok(AdminGuard)
        } else {
            Err(unauthorized())
        }
    }
}

fn unauthorized() -> (StatusCode, axum::Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({ "error": "unauthorized" })),
    )
}
