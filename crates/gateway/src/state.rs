//! Shared application state, cloned into every Axum handler.
//!
//! Mirrors the teacher's `AppState`: one `#[derive(Clone)]` struct, fields
//! grouped by concern, everything that needs sharing wrapped in `Arc`.

use std::sync::Arc;
use std::time::Instant;

use lgw_domain::config::RuntimeConfig;
use lgw_storage::{AuditStore, QuotaStore, WebUiStore};
use parking_lot::RwLock;

use crate::cache::CacheLayer;
use crate::system_log::SystemLog;

#[derive(Clone)]
pub struct AppState {
    // ── Durable stores ───────────────────────────────────────────────
    pub audit: AuditStore,
    pub quota: QuotaStore,
    pub webui: WebUiStore,

    // ── Runtime configuration ───────────────────────────────────────
    pub config: Arc<RwLock<RuntimeConfig>>,

    // ── Caches & logs ────────────────────────────────────────────────
    pub cache: Arc<CacheLayer>,
    pub system_log: Arc<SystemLog>,

    // ── Upstream dispatch ────────────────────────────────────────────
    pub http: reqwest::Client,
    pub upstream_base: String,

    // ── Boot bookkeeping ─────────────────────────────────────────────
    pub started_at: Instant,
}

impl AppState {
    pub fn config_snapshot(&self) -> RuntimeConfig {
        self.config.read().clone()
    }
}
