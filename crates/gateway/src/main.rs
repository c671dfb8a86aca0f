mod api;
mod cache;
mod config_bus;
mod identity;
mod policy;
mod proxy;
mod state;
mod system_log;
mod usage;

use std::sync::Arc;
use std::time::Instant;

use lgw_domain::config::RuntimeConfig;
use lgw_storage::{AuditStore, QuotaStore, WebUiStore};
use parking_lot::RwLock;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cache::CacheLayer;
use crate::state::AppState;
use crate::system_log::SystemLog;

const UPSTREAM_BASE: &str = "https://openrouter.ai/api";
const DEFAULT_BIND: &str = "0.0.0.0:8080";
const MAX_CONCURRENT_REQUESTS: usize = 512;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let seed = RuntimeConfig::seed_from_env();
    let env_only = RuntimeConfig::from_map(seed.clone());
    let missing = env_only.missing_required();
    if !missing.is_empty() {
        anyhow::bail!("Missing required config: {}", missing.join(", "));
    }

    let database_url = env_only
        .database_url()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL missing"))?
        .to_string();
    let webui_database_url = env_only
        .webui_database_url()
        .ok_or_else(|| anyhow::anyhow!("WEBUI_DATABASE_URL missing"))?
        .to_string();
    let redis_url = env_only
        .redis_url()
        .ok_or_else(|| anyhow::anyhow!("REDIS_URL missing"))?
        .to_string();

    let audit = AuditStore::connect(&database_url).await?;
    tracing::info!("audit store connected");
    let webui = WebUiStore::connect(&webui_database_url).await?;
    tracing::info!("webui store connected");
    let quota = QuotaStore::connect(&redis_url).await?;
    tracing::info!("quota store connected");

    audit.ensure_system_config_seeded(&seed).await?;
    let rows = audit.list_system_config().await?;
    let config = RuntimeConfig::from_map(rows.into_iter().map(|r| (r.key, r.value)).collect());
    let missing = config.missing_required();
    if !missing.is_empty() {
        anyhow::bail!("Missing required config: {}", missing.join(", "));
    }
    tracing::info!("runtime configuration loaded");

    let system_log = Arc::new(SystemLog::new());
    let config = Arc::new(RwLock::new(config));

    let http = reqwest::Client::builder()
        .build()
        .expect("reqwest client construction cannot fail with default settings");

    let state = AppState {
        audit: audit.clone(),
        quota: quota.clone(),
        webui,
        config: Arc::clone(&config),
        cache: Arc::new(CacheLayer::new()),
        system_log: Arc::clone(&system_log),
        http,
        upstream_base: UPSTREAM_BASE.to_string(),
        started_at: Instant::now(),
    };

    tokio::spawn(usage::run_drain_loop_supervised(
        audit.clone(),
        quota.clone(),
        Arc::clone(&system_log),
    ));
    tracing::info!("usage pipeline drain workers started");

    tokio::spawn(config_bus::run_subscriber(
        audit,
        quota,
        Arc::clone(&config),
        Arc::clone(&system_log),
    ));
    tracing::info!("config bus subscriber started");

    let cors = CorsLayer::permissive();

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS));

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();
}
