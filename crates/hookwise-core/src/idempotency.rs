//! Idempotency port for duplicate delivery detection.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::StoreResult;
use crate::types::IdempotencyRecord;

/// Records processed keys so that repeats within a TTL window are rejected.
///
/// Backends may be in-process or external; callers must not assume which.
/// `record` is the only serialization point between concurrent ingestions of
/// the same key and has to be an atomic check-and-set: of any number of
/// concurrent calls with one key, at most one returns `true`.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Whether an unexpired record exists for `key`.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Record `key` for `ttl`. Returns `false` if an unexpired record was already present.
    async fn record(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.record_with_metadata(key, ttl, None).await
    }

    /// Same as [`record`](Self::record) with free-form metadata attached.
    async fn record_with_metadata(
        &self,
        key: &str,
        ttl: Duration,
        metadata: Option<serde_json::Value>,
    ) -> StoreResult<bool>;

    /// Fetch the unexpired record for `key`.
    async fn get(&self, key: &str) -> StoreResult<Option<IdempotencyRecord>>;

    /// Explicitly delete a key. Returns whether a record was removed.
    async fn remove(&self, key: &str) -> StoreResult<bool>;

    /// Sweep expired records, returning how many were dropped.
    async fn expire(&self) -> StoreResult<u64>;
}
