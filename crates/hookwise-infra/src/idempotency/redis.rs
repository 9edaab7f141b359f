use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use std::time::Duration;
use tracing::{debug, info, warn};

use hookwise_core::{
    IdempotencyConfig, IdempotencyRecord, IdempotencyStore, RedisConfig, StoreError, StoreResult,
};

#[derive(Debug, Clone)]
pub struct RedisIdempotencyConfig {
    pub url: String,
    pub key_prefix: Option<String>,
}

impl Default for RedisIdempotencyConfig {
    fn default() -> Self {
        Self {
            url: String::from("redis://127.0.0.1:6379"),
            key_prefix: Some(IdempotencyConfig::default().key_prefix),
        }
    }
}

impl RedisIdempotencyConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Connection from the `redis` section, prefix from `idempotency.key_prefix`.
    /// An empty prefix stores keys unprefixed.
    pub fn from_config(redis: &RedisConfig, idempotency: &IdempotencyConfig) -> Self {
        let prefix = Some(idempotency.key_prefix.clone()).filter(|p| !p.is_empty());
        Self::new(redis.url.clone()).with_key_prefix(prefix)
    }

    pub fn with_key_prefix(mut self, prefix: Option<String>) -> Self {
        self.key_prefix = prefix;
        self
    }

    fn make_key(&self, key: &str) -> String {
        match &self.key_prefix {
            Some(prefix) => format!("{}{}", prefix, key),
            None => key.to_string(),
        }
    }
}

/// Idempotency store backed by Redis key expiry.
///
/// `record` is a single `SET key value NX PX ttl`, which Redis executes
/// atomically, so concurrent processes sharing the server agree on one winner.
#[derive(Clone)]
pub struct RedisIdempotencyStore {
    connection: ConnectionManager,
    config: RedisIdempotencyConfig,
}

impl RedisIdempotencyStore {
    pub async fn new(config: RedisIdempotencyConfig) -> StoreResult<Self> {
        info!("Connecting to Redis at {}", config.url);

        let client = Client::open(config.url.clone()).map_err(store_error)?;
        let connection = ConnectionManager::new(client).await.map_err(store_error)?;

        info!("Redis connection established");

        Ok(Self { connection, config })
    }

    pub async fn health_check(&self) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("PING").query_async(&mut conn).await.map_err(|e| {
            warn!("Redis health check failed: {}", e);
            store_error(e)
        })?;

        Ok(())
    }
}

fn store_error(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_timeout() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Backend(e.to_string())
    }
}

/// Millisecond TTL for `PX`; Redis rejects zero.
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis().min(u64::MAX as u128) as u64).max(1)
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let full_key = self.config.make_key(key);
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(&full_key).await.map_err(store_error)?;
        Ok(exists)
    }

    async fn record_with_metadata(
        &self,
        key: &str,
        ttl: Duration,
        metadata: Option<serde_json::Value>,
    ) -> StoreResult<bool> {
        let full_key = self.config.make_key(key);
        let record = IdempotencyRecord::new(key, ttl).with_metadata(metadata);
        let serialized = serde_json::to_string(&record)?;

        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(&full_key)
            .arg(serialized)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        let recorded = reply.is_some();
        debug!(key = %full_key, recorded = recorded, "Idempotency SET NX");
        Ok(recorded)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        let full_key = self.config.make_key(key);
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(&full_key).await.map_err(store_error)?;

        match value {
            Some(v) => Ok(Some(serde_json::from_str(&v)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> StoreResult<bool> {
        let full_key = self.config.make_key(key);
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(&full_key).await.map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn expire(&self) -> StoreResult<u64> {
        // Redis evicts expired keys itself.
        Ok(0)
    }
}
