//! ConfigBus (`§4.7`): publishes config-changed notices and reloads the
//! local `RuntimeConfig` on every replica when one arrives.
//!
//! Pub/sub is treated as best-effort per the design notes — a lost message
//! is self-healed by the TTL-bounded caches and by any admin operation that
//! re-reads `system_config` directly.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use lgw_domain::config::RuntimeConfig;
use lgw_domain::model::CONFIG_BUS_CHANNEL;
use lgw_storage::{AuditStore, QuotaStore};

use crate::system_log::SystemLog;

const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

pub async fn publish_change(quota: &QuotaStore, changed: &[String]) -> Result<(), lgw_storage::StorageError> {
    let payload = serde_json::json!({ "changed": changed, "ts": chrono::Utc::now() }).to_string();
    quota.publish(CONFIG_BUS_CHANNEL, &payload).await
}

pub async fn reload_from_store(
    audit: &AuditStore,
    config: &parking_lot::RwLock<RuntimeConfig>,
) -> Result<(), lgw_storage::StorageError> {
    let rows = audit.list_system_config().await?;
    let map: BTreeMap<String, String> = rows.into_iter().map(|r| (r.key, r.value)).collect();
    *config.write() = RuntimeConfig::from_map(map);
    Ok(())
}

/// Long-lived subscriber loop. Re-subscribes with a fixed backoff if the
/// underlying Redis connection drops.
pub async fn run_subscriber(
    audit: AuditStore,
    quota: QuotaStore,
    config: Arc<parking_lot::RwLock<RuntimeConfig>>,
    system_log: Arc<SystemLog>,
) {
    loop {
        let stream = match quota.subscribe(CONFIG_BUS_CHANNEL).await {
            Ok(stream) => stream,
            Err(err) => {
                system_log.error(format!("config bus subscribe failed: {err}"));
                tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
                continue;
            }
        };
        tokio::pin!(stream);
        while stream.next().await.is_some() {
            match reload_from_store(&audit, &config).await {
                Ok(()) => system_log.info("config reloaded from pub/sub"),
                Err(err) => system_log.error(format!("config reload failed: {err}")),
            }
        }
        system_log.warn("config bus subscription ended, resubscribing");
        tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
    }
}
