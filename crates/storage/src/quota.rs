//! `QuotaStore` — the Redis-backed hot path for usage counters and the
//! durable list queues that decouple the proxy from `AuditStore` latency.
//!
//! Also doubles as the transport for `ConfigBus`: the same Redis instance
//! carries the `middleware:config:updated` pub/sub channel.

use futures_util::Stream;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::StorageError;

#[derive(Clone)]
pub struct QuotaStore {
    client: redis::Client,
    manager: ConnectionManager,
}

impl QuotaStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(redis_url)?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { client, manager })
    }

    pub async fn ping(&self) -> bool {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }

    /// Atomically increment `key` by `delta` and (re)set its TTL. Used for
    /// the daily/monthly usage counters, which must never expire before
    /// the 40-day floor mandated by `§3`.
    pub async fn incr_with_ttl(
        &self,
        key: &str,
        delta: i64,
        ttl_seconds: i64,
    ) -> Result<i64, StorageError> {
        let mut conn = self.manager.clone();
        let new_value: i64 = conn.incr(key, delta).await?;
        let _: () = conn.expire(key, ttl_seconds).await?;
        Ok(new_value)
    }

    /// Single multi-get for the daily + monthly counters (`§4.2` requires
    /// both be observed atomically as one round trip).
    pub async fn mget_counters(&self, daily_key: &str, monthly_key: &str) -> Result<(i64, i64), StorageError> {
        let mut conn = self.manager.clone();
        let values: Vec<Option<i64>> = conn.mget(&[daily_key, monthly_key]).await?;
        let daily = values.first().copied().flatten().unwrap_or(0);
        let monthly = values.get(1).copied().flatten().unwrap_or(0);
        Ok((daily, monthly))
    }

    /// Left-push a durable-queue payload (consumers right-pop, preserving
    /// FIFO order per `§5`).
    pub async fn enqueue(&self, queue_key: &str, payload: &str) -> Result<(), StorageError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.lpush(queue_key, payload).await?;
        Ok(())
    }

    /// Drain up to `max` items from the tail of `queue_key`.
    pub async fn drain(&self, queue_key: &str, max: usize) -> Result<Vec<String>, StorageError> {
        let mut conn = self.manager.clone();
        let mut out = Vec::with_capacity(max.min(100));
        for _ in 0..max {
            let item: Option<String> = conn.rpop(queue_key, None).await?;
            match item {
                Some(payload) => out.push(payload),
                None => break,
            }
        }
        Ok(out)
    }

    pub async fn queue_len(&self, queue_key: &str) -> Result<i64, StorageError> {
        let mut conn = self.manager.clone();
        let len: i64 = conn.llen(queue_key).await?;
        Ok(len)
    }

    pub async fn publish(&self, channel: &str, message: &str) -> Result<(), StorageError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn.publish(channel, message).await?;
        Ok(())
    }

    /// Subscribe to a pub/sub channel. Uses a dedicated connection (the
    /// shared `ConnectionManager` cannot enter subscriber mode), so this
    /// should be called once per replica at boot and held open.
    pub async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<impl Stream<Item = String>, StorageError> {
        let conn = self.client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await?;
        let stream = pubsub
            .into_on_message()
            .map(|msg| msg.get_payload::<String>().unwrap_or_default());
        Ok(stream)
    }
}
