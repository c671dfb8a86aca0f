//! UsagePipeline (`§4.5`): hot-path enqueue plus the background drain loops
//! that decouple the proxy from `AuditStore` latency.

use std::time::Duration;

use chrono::Utc;
use lgw_domain::model::{
    QuotaKeys, RequestLogEntry, UsageEvent, REQUEST_PERF_QUEUE_KEY, USAGE_QUEUE_KEY,
};
use lgw_storage::{AuditStore, QuotaStore};
use serde_json::Value;

use crate::system_log::SystemLog;

const DRAIN_BATCH: usize = 100;
const IDLE_SLEEP: Duration = Duration::from_secs(1);
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// `usage.cost` is preferred over `usage.total_cost` per the open question
/// in the design notes: upstream has been observed to emit either.
pub fn extract_total_cost(usage: &Value) -> f64 {
    usage
        .get("cost")
        .and_then(Value::as_f64)
        .or_else(|| usage.get("total_cost").and_then(Value::as_f64))
        .unwrap_or(0.0)
}

/// Pull `total_tokens`/prompt/completion/cost out of an upstream `usage`
/// object and enqueue the resulting `UsageEvent`, bumping both rolling
/// counters in the same round trip.
pub async fn record_usage(
    quota: &QuotaStore,
    system_log: &SystemLog,
    user_id: &str,
    model: &str,
    usage: &Value,
) {
    let prompt_tokens = usage.get("prompt_tokens").and_then(Value::as_i64).unwrap_or(0);
    let completion_tokens = usage
        .get("completion_tokens")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let total_tokens = usage
        .get("total_tokens")
        .and_then(Value::as_i64)
        .unwrap_or(prompt_tokens + completion_tokens);
    let total_cost = extract_total_cost(usage);

    let today = Utc::now().date_naive();
    let daily_key = QuotaKeys::daily(user_id, &today);
    let monthly_key = QuotaKeys::monthly(user_id, &today);

    if let Err(err) = quota
        .incr_with_ttl(&daily_key, total_tokens, QuotaKeys::TTL_SECONDS)
        .await
    {
        system_log.warn(format!("daily counter increment failed for {user_id}: {err}"));
    }
    if let Err(err) = quota
        .incr_with_ttl(&monthly_key, total_tokens, QuotaKeys::TTL_SECONDS)
        .await
    {
        system_log.warn(format!("monthly counter increment failed for {user_id}: {err}"));
    }

    let event = UsageEvent {
        user_id: user_id.to_string(),
        model: model.to_string(),
        prompt_tokens,
        completion_tokens,
        total_tokens,
        total_cost,
        ts: Utc::now(),
    };
    match serde_json::to_string(&event) {
        Ok(payload) => {
            if let Err(err) = quota.enqueue(USAGE_QUEUE_KEY, &payload).await {
                system_log.warn(format!("usage enqueue failed: {err}"));
            }
        }
        Err(err) => system_log.warn(format!("usage event serialize failed: {err}")),
    }
}

pub async fn record_request_log(quota: &QuotaStore, system_log: &SystemLog, entry: &RequestLogEntry) {
    match serde_json::to_string(entry) {
        Ok(payload) => {
            if let Err(err) = quota.enqueue(REQUEST_PERF_QUEUE_KEY, &payload).await {
                system_log.warn(format!("request log enqueue failed: {err}"));
            }
        }
        Err(err) => system_log.warn(format!("request log serialize failed: {err}")),
    }
}

/// Drain up to `DRAIN_BATCH` items from `usage_queue`, one by one, into
/// `AuditStore`. A single bad row is logged and skipped, never aborting the
/// loop (`§4.5`: worker death is forbidden).
async fn drain_usage_once(audit: &AuditStore, quota: &QuotaStore, system_log: &SystemLog) -> usize {
    let items = match quota.drain(USAGE_QUEUE_KEY, DRAIN_BATCH).await {
        Ok(items) => items,
        Err(err) => {
            system_log.error(format!("usage queue drain failed: {err}"));
            return 0;
        }
    };
    let count = items.len();
    for payload in items {
        let event: UsageEvent = match serde_json::from_str(&payload) {
            Ok(event) => event,
            Err(err) => {
                system_log.error(format!("usage event decode failed: {err}"));
                continue;
            }
        };
        if let Err(err) = audit.insert_usage_log(&event).await {
            system_log.error(format!("usage log insert failed: {err}"));
        }
    }
    count
}

async fn drain_request_log_once(audit: &AuditStore, quota: &QuotaStore, system_log: &SystemLog) -> usize {
    let items = match quota.drain(REQUEST_PERF_QUEUE_KEY, DRAIN_BATCH).await {
        Ok(items) => items,
        Err(err) => {
            system_log.error(format!("request log queue drain failed: {err}"));
            return 0;
        }
    };
    let count = items.len();
    for payload in items {
        let entry: RequestLogEntry = match serde_json::from_str(&payload) {
            Ok(entry) => entry,
            Err(err) => {
                system_log.error(format!("request log decode failed: {err}"));
                continue;
            }
        };
        if let Err(err) = audit.insert_request_log(&entry).await {
            system_log.error(format!("request log insert failed: {err}"));
        }
    }
    count
}

/// Long-lived drain loop for one queue/insert pair. Never returns; any
/// per-iteration error is logged and the loop backs off 1 s before
/// retrying.
pub async fn run_drain_loop(audit: AuditStore, quota: QuotaStore, system_log: std::sync::Arc<SystemLog>) {
    loop {
        let usage_drained = drain_usage_once(&audit, &quota, &system_log).await;
        let request_drained = drain_request_log_once(&audit, &quota, &system_log).await;

        if usage_drained == 0 && request_drained == 0 {
            tokio::time::sleep(IDLE_SLEEP).await;
        }
    }
}

/// Variant used when a drain iteration itself panics the surrounding task —
/// kept as a thin wrapper so `main` can `tokio::spawn` a loop that respawns
/// itself on an unexpected join error instead of silently disappearing.
pub async fn run_drain_loop_supervised(
    audit: AuditStore,
    quota: QuotaStore,
    system_log: std::sync::Arc<SystemLog>,
) {
    loop {
        let audit = audit.clone();
        let quota = quota.clone();
        let log = system_log.clone();
        let handle = tokio::spawn(run_drain_loop(audit, quota, log));
        if let Err(err) = handle.await {
            system_log.error(format!("usage drain worker panicked: {err}"));
            tokio::time::sleep(ERROR_BACKOFF).await;
        }
    }
}
