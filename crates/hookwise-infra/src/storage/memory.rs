//! In-memory webhook storage for tests and single-process deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use hookwise_core::{DeliveryId, StoreResult, WebhookDelivery, WebhookStorage};

/// Delivery storage keyed by delivery identifier
#[derive(Default)]
pub struct InMemoryWebhookStorage {
    deliveries: DashMap<DeliveryId, WebhookDelivery>,
}

impl InMemoryWebhookStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    /// All stored deliveries, oldest first
    pub fn list(&self) -> Vec<WebhookDelivery> {
        let mut deliveries: Vec<_> = self.deliveries.iter().map(|d| d.clone()).collect();
        deliveries.sort_by_key(|d| d.received_at());
        deliveries
    }
}

#[async_trait]
impl WebhookStorage for InMemoryWebhookStorage {
    async fn save(&self, delivery: &WebhookDelivery) -> StoreResult<WebhookDelivery> {
        // First write wins; later saves of the same id are no-ops.
        let stored = self
            .deliveries
            .entry(delivery.id().clone())
            .or_insert_with(|| delivery.clone())
            .clone();

        debug!(delivery_id = %delivery.id(), "Saved delivery");
        Ok(stored)
    }

    async fn get(&self, id: &DeliveryId) -> StoreResult<Option<WebhookDelivery>> {
        Ok(self.deliveries.get(id).map(|d| d.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(id: &str, event: &str) -> WebhookDelivery {
        WebhookDelivery::new(DeliveryId::new(id), event, b"{}".to_vec())
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let storage = InMemoryWebhookStorage::new();

        let saved = storage.save(&delivery("d1", "issues")).await.unwrap();
        assert_eq!(saved.id().as_str(), "d1");

        let retrieved = storage.get(&DeliveryId::new("d1")).await.unwrap();
        assert_eq!(retrieved.unwrap().event(), "issues");
        assert!(storage.get(&DeliveryId::new("d2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_is_idempotent() {
        let storage = InMemoryWebhookStorage::new();

        storage.save(&delivery("d1", "issues")).await.unwrap();
        let second = storage.save(&delivery("d1", "push")).await.unwrap();

        assert_eq!(storage.len(), 1);
        assert_eq!(second.event(), "issues");
    }

    #[tokio::test]
    async fn test_list_orders_by_arrival() {
        let storage = InMemoryWebhookStorage::new();
        let earlier = delivery("a", "push").with_received_at(chrono::Utc::now() - chrono::Duration::seconds(5));

        storage.save(&delivery("b", "push")).await.unwrap();
        storage.save(&earlier).await.unwrap();

        let ids: Vec<_> = storage.list().iter().map(|d| d.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
