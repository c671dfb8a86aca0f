//! Core data model shared by the proxy pipeline, the policy engine, and the
//! admin surface. See `AuditStore` in `lgw-storage` for the durable
//! representation of these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The policy id that must always exist and can never be deleted.
pub const DEFAULT_POLICY_ID: &str = "default";

/// A signed token limit: a negative value (by convention `-1`) means
/// unlimited.
pub type TokenLimit = i64;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Policy {
    pub id: String,
    pub name: String,
    pub daily_token_limit: TokenLimit,
    pub monthly_token_limit: TokenLimit,
    /// Either the literal `"*"` or a comma-separated list of model ids.
    pub allowed_models: String,
    pub created_at: DateTime<Utc>,
}

impl Policy {
    pub fn is_unlimited_daily(&self) -> bool {
        self.daily_token_limit < 0
    }

    pub fn is_unlimited_monthly(&self) -> bool {
        self.monthly_token_limit < 0
    }

    pub fn allows_model(&self, model: &str) -> bool {
        if self.allowed_models.trim() == "*" {
            return true;
        }
        self.allowed_models
            .split(',')
            .map(|m| m.trim())
            .any(|m| m == model)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    /// Boolean-valued integer, matching the external datastore convention.
    pub is_active: i32,
    pub policy_id: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.is_active != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GroupPolicy {
    pub group_name: String,
    pub policy_id: String,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub user_id: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UsageLog {
    pub id: i64,
    pub user_id: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub user_id: Option<String>,
    pub model: String,
    pub path: String,
    pub method: String,
    pub status: i32,
    pub is_stream: bool,
    pub latency_ms: i64,
    pub total_cost: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RequestLog {
    pub id: i64,
    pub user_id: Option<String>,
    pub model: String,
    pub path: String,
    pub method: String,
    pub status: i32,
    pub is_stream: bool,
    pub latency_ms: i64,
    pub total_cost: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SystemConfigRow {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// The two Redis keys backing a user's rolling usage counters.
///
/// Both carry a TTL of at least 40 days (`§3` calls for `TTL >= 3_456_000`
/// seconds) so that a counter surviving past its natural window never
/// silently resets mid-billing-period.
pub struct QuotaKeys;

impl QuotaKeys {
    pub const TTL_SECONDS: i64 = 3_456_000;

    pub fn daily(user_id: &str, date: &chrono::NaiveDate) -> String {
        format!("usage:user:{user_id}:daily:{}", date.format("%Y-%m-%d"))
    }

    pub fn monthly(user_id: &str, date: &chrono::NaiveDate) -> String {
        format!("usage:user:{user_id}:monthly:{}", date.format("%Y-%m"))
    }
}

pub const USAGE_QUEUE_KEY: &str = "usage_queue";
pub const REQUEST_PERF_QUEUE_KEY: &str = "request_perf_queue";
pub const CONFIG_BUS_CHANNEL: &str = "middleware:config:updated";

/// Outcome of `PolicyEngine::check_access`.
#[derive(Debug, Clone, Serialize)]
pub struct AccessDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AccessDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}
