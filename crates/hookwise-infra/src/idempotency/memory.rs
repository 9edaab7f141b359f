//! In-memory idempotency store
//!
//! Lazy TTL on every read plus an optional periodic sweep. Suitable for a
//! single process; multi-instance deployments should use the Redis backend.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use hookwise_core::{IdempotencyConfig, IdempotencyRecord, IdempotencyStore, StoreResult};

/// Configuration for the memory store
#[derive(Debug, Clone)]
pub struct MemoryIdempotencyConfig {
    /// How often expired records are swept (None disables the background task)
    pub sweep_interval: Option<Duration>,
}

impl Default for MemoryIdempotencyConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl MemoryIdempotencyConfig {
    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }
}

/// In-memory idempotency store
#[derive(Clone)]
pub struct MemoryIdempotencyStore {
    records: Arc<RwLock<HashMap<String, IdempotencyRecord>>>,
}

impl MemoryIdempotencyStore {
    /// Create a new store; must be called inside a Tokio runtime when a sweep interval is set
    pub fn new(config: MemoryIdempotencyConfig) -> Self {
        let store = Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        };

        if let Some(interval) = config.sweep_interval {
            let records = Arc::downgrade(&store.records);
            tokio::spawn(sweep_loop(records, interval));
        }

        store
    }

    /// Store sweeping at `idempotency.sweep_interval_seconds` (0 disables the sweep)
    pub fn from_config(config: &IdempotencyConfig) -> Self {
        Self::new(MemoryIdempotencyConfig::default().with_sweep_interval(config.sweep_interval()))
    }

    /// Store without a background sweep; expiry is purely lazy
    pub fn without_sweep() -> Self {
        Self::new(MemoryIdempotencyConfig::default().with_sweep_interval(None))
    }

    /// Number of records held, expired or not
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

async fn sweep_loop(records: Weak<RwLock<HashMap<String, IdempotencyRecord>>>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(records) = records.upgrade() else {
            break;
        };
        let removed = sweep(&mut *records.write().await);
        if removed > 0 {
            debug!(removed = removed, "Idempotency sweep removed expired records");
        }
    }
}

fn sweep(records: &mut HashMap<String, IdempotencyRecord>) -> u64 {
    let now = Utc::now();
    let before = records.len();
    records.retain(|_, record| !record.is_expired_at(now));
    (before - records.len()) as u64
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let records = self.records.read().await;
        Ok(records.get(key).map(|r| !r.is_expired()).unwrap_or(false))
    }

    async fn record_with_metadata(
        &self,
        key: &str,
        ttl: Duration,
        metadata: Option<serde_json::Value>,
    ) -> StoreResult<bool> {
        // Check and insert under one write guard.
        let mut records = self.records.write().await;

        if let Some(existing) = records.get(key) {
            if !existing.is_expired() {
                debug!(key = %key, "Idempotency key already recorded");
                return Ok(false);
            }
        }

        records.insert(
            key.to_string(),
            IdempotencyRecord::new(key, ttl).with_metadata(metadata),
        );
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Recorded idempotency key");
        Ok(true)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>> {
        let records = self.records.read().await;
        Ok(records.get(key).filter(|r| !r.is_expired()).cloned())
    }

    async fn remove(&self, key: &str) -> StoreResult<bool> {
        let mut records = self.records.write().await;
        let removed = records.remove(key).is_some();
        debug!(key = %key, removed = removed, "Removed idempotency key");
        Ok(removed)
    }

    async fn expire(&self) -> StoreResult<u64> {
        Ok(sweep(&mut *self.records.write().await))
    }
}
