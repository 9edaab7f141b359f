//! Durable storage port for received deliveries.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{DeliveryId, WebhookDelivery};

/// Persistence engine consumed by the pipeline.
///
/// Saving is idempotent: saving an identifier that already exists is a
/// successful no-op and the previously stored record is returned, so that
/// exactly one record exists per delivery identifier.
#[async_trait]
pub trait WebhookStorage: Send + Sync {
    /// Durably write a delivery and return the storage-confirmed record.
    async fn save(&self, delivery: &WebhookDelivery) -> StoreResult<WebhookDelivery>;

    /// Get a delivery by identifier.
    async fn get(&self, id: &DeliveryId) -> StoreResult<Option<WebhookDelivery>>;
}
