//! `AuditStore` — the durable relational store for policies, users, group
//! policies, and the append-only usage/request logs.
//!
//! Backed by Postgres via `sqlx`. Connection pooling, not a single
//! connection, is used throughout so admin reads never contend with the
//! background drain workers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use lgw_domain::model::{
    GroupPolicy, Policy, RequestLog, RequestLogEntry, SystemConfigRow, UsageEvent, UsageLog, User,
    DEFAULT_POLICY_ID,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::StorageError;

#[derive(Clone)]
pub struct AuditStore {
    pool: PgPool,
}

impl AuditStore {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    // ── Policies ─────────────────────────────────────────────────────

    pub async fn get_policy(&self, id: &str) -> Result<Option<Policy>, StorageError> {
        let policy = sqlx::query_as::<_, Policy>("SELECT * FROM policies WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(policy)
    }

    pub async fn list_policies(&self) -> Result<Vec<Policy>, StorageError> {
        let policies =
            sqlx::query_as::<_, Policy>("SELECT * FROM policies ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(policies)
    }

    /// Upsert semantics: insert a new policy or overwrite an existing one
    /// by id.
    pub async fn upsert_policy(
        &self,
        id: &str,
        name: &str,
        daily_token_limit: i64,
        monthly_token_limit: i64,
        allowed_models: &str,
    ) -> Result<Policy, StorageError> {
        let policy = sqlx::query_as::<_, Policy>(
            r#"
            INSERT INTO policies (id, name, daily_token_limit, monthly_token_limit, allowed_models)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                daily_token_limit = EXCLUDED.daily_token_limit,
                monthly_token_limit = EXCLUDED.monthly_token_limit,
                allowed_models = EXCLUDED.allowed_models
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(daily_token_limit)
        .bind(monthly_token_limit)
        .bind(allowed_models)
        .fetch_one(&self.pool)
        .await?;
        Ok(policy)
    }

    /// Deleting the `default` policy is a no-op — returns `false`.
    pub async fn delete_policy(&self, id: &str) -> Result<bool, StorageError> {
        if id == DEFAULT_POLICY_ID {
            return Ok(false);
        }
        let result = sqlx::query("DELETE FROM policies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Users ────────────────────────────────────────────────────────

    pub async fn get_user(&self, id: &str) -> Result<Option<User>, StorageError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// Insert-or-ignore by primary key — used by the proxy pipeline on
    /// first sighting of a user.
    pub async fn ensure_user(&self, id: &str) -> Result<User, StorageError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, is_active, policy_id)
            VALUES ($1, 1, $2)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(DEFAULT_POLICY_ID)
        .execute(&self.pool)
        .await?;

        let user = self
            .get_user(id)
            .await?
            .ok_or_else(|| StorageError::Inconsistent("user vanished after insert".into()))?;
        Ok(user)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, StorageError> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    pub async fn update_user(
        &self,
        id: &str,
        is_active: Option<bool>,
        policy_id: Option<&str>,
    ) -> Result<Option<User>, StorageError> {
        if self.get_user(id).await?.is_none() {
            return Ok(None);
        }
        if let Some(active) = is_active {
            sqlx::query("UPDATE users SET is_active = $1 WHERE id = $2")
                .bind(active as i32)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        if let Some(policy) = policy_id {
            sqlx::query("UPDATE users SET policy_id = $1 WHERE id = $2")
                .bind(policy)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        self.get_user(id).await
    }

    // ── Group policies ───────────────────────────────────────────────

    pub async fn list_group_policies(&self) -> Result<Vec<GroupPolicy>, StorageError> {
        let rows = sqlx::query_as::<_, GroupPolicy>(
            "SELECT * FROM group_policies ORDER BY group_name ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn upsert_group_policy(
        &self,
        group_name: &str,
        policy_id: &str,
        priority: i32,
    ) -> Result<GroupPolicy, StorageError> {
        let row = sqlx::query_as::<_, GroupPolicy>(
            r#"
            INSERT INTO group_policies (group_name, policy_id, priority)
            VALUES ($1, $2, $3)
            ON CONFLICT (group_name) DO UPDATE SET
                policy_id = EXCLUDED.policy_id,
                priority = EXCLUDED.priority
            RETURNING *
            "#,
        )
        .bind(group_name)
        .bind(policy_id)
        .bind(priority)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn delete_group_policy(&self, group_name: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM group_policies WHERE group_name = $1")
            .bind(group_name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Usage / request logs ─────────────────────────────────────────

    pub async fn insert_usage_log(&self, event: &UsageEvent) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO usage_logs
                (user_id, model, prompt_tokens, completion_tokens, total_tokens, total_cost, ts)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&event.user_id)
        .bind(&event.model)
        .bind(event.prompt_tokens)
        .bind(event.completion_tokens)
        .bind(event.total_tokens)
        .bind(event.total_cost)
        .bind(event.ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_request_log(&self, entry: &RequestLogEntry) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO request_logs
                (user_id, model, path, method, status, is_stream, latency_ms, total_cost, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&entry.user_id)
        .bind(&entry.model)
        .bind(&entry.path)
        .bind(&entry.method)
        .bind(entry.status)
        .bind(entry.is_stream)
        .bind(entry.latency_ms)
        .bind(entry.total_cost)
        .bind(entry.started_at)
        .bind(entry.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_usage_logs(&self, limit: i64) -> Result<Vec<UsageLog>, StorageError> {
        let rows = sqlx::query_as::<_, UsageLog>(
            "SELECT * FROM usage_logs ORDER BY ts DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn latest_request_logs(&self, limit: i64) -> Result<Vec<RequestLog>, StorageError> {
        let rows = sqlx::query_as::<_, RequestLog>(
            "SELECT * FROM request_logs ORDER BY started_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ── Stats / performance aggregation (admin surface) ───────────────

    pub async fn usage_totals(&self, since: Option<DateTime<Utc>>) -> Result<UsageTotals, StorageError> {
        let row: (Option<i64>, Option<f64>, Option<i64>) = match since {
            Some(ts) => {
                sqlx::query_as(
                    "SELECT COALESCE(SUM(total_tokens),0), COALESCE(SUM(total_cost),0), COUNT(*) \
                     FROM usage_logs WHERE ts >= $1",
                )
                .bind(ts)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT COALESCE(SUM(total_tokens),0), COALESCE(SUM(total_cost),0), COUNT(*) \
                     FROM usage_logs",
                )
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(UsageTotals {
            total_tokens: row.0.unwrap_or(0),
            total_cost: row.1.unwrap_or(0.0),
            request_count: row.2.unwrap_or(0),
        })
    }

    pub async fn top_models(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<(String, i64)>, StorageError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT model, SUM(total_tokens) AS tokens
            FROM usage_logs
            WHERE ts >= $1
            GROUP BY model
            ORDER BY tokens DESC
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn top_users(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<(String, i64)>, StorageError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT user_id, SUM(total_tokens) AS tokens
            FROM usage_logs
            WHERE ts >= $1
            GROUP BY user_id
            ORDER BY tokens DESC
            LIMIT $2
            "#,
        )
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Latency samples (milliseconds) over the given window, used to
    /// compute exact-rank percentiles in the caller.
    pub async fn latency_samples(&self, since: DateTime<Utc>) -> Result<Vec<i64>, StorageError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT latency_ms FROM request_logs WHERE started_at >= $1 ORDER BY latency_ms ASC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    // ── System config ─────────────────────────────────────────────────

    pub async fn list_system_config(&self) -> Result<Vec<SystemConfigRow>, StorageError> {
        let rows = sqlx::query_as::<_, SystemConfigRow>("SELECT * FROM system_config")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Insert-if-absent for each key, used once at boot to seed rows from
    /// the process environment.
    pub async fn ensure_system_config_seeded(
        &self,
        seed: &BTreeMap<String, String>,
    ) -> Result<(), StorageError> {
        for (key, value) in seed {
            sqlx::query(
                r#"
                INSERT INTO system_config (key, value)
                VALUES ($1, $2)
                ON CONFLICT (key) DO NOTHING
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Upsert a batch of config rows with a fresh `updated_at`, in a single
    /// transaction so a partial write can never be observed.
    pub async fn upsert_system_config(
        &self,
        updates: &BTreeMap<String, String>,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in updates {
            sqlx::query(
                r#"
                INSERT INTO system_config (key, value, updated_at)
                VALUES ($1, $2, now())
                ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UsageTotals {
    pub total_tokens: i64,
    pub total_cost: f64,
    pub request_count: i64,
}
