//! Dead-letter queue
//!
//! Terminal holding area for replay tasks that used up their retry budget.
//! Items stay until an operator deletes or requeues them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;
use uuid::Uuid;

use crate::replay::{QueueError, ReplayTask};

/// Identity of a dead-lettered item, distinct from the delivery id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeadLetterId(Uuid);

impl DeadLetterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DeadLetterId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for DeadLetterId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::str::FromStr for DeadLetterId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::fmt::Display for DeadLetterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An exhausted task with its failure context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterItem {
    pub id: DeadLetterId,
    pub task: ReplayTask,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Summary of the dead-letter queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeadLetterStats {
    pub total: usize,
    pub oldest_failure: Option<DateTime<Utc>>,
    pub newest_failure: Option<DateTime<Utc>>,
    /// Item count per event name
    pub by_event: BTreeMap<String, usize>,
}

#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    async fn move_to_dead_letter(
        &self,
        task: ReplayTask,
        reason: &str,
    ) -> Result<DeadLetterItem, QueueError>;

    /// All items, newest failure first
    async fn list(&self) -> Result<Vec<DeadLetterItem>, QueueError>;

    async fn get(&self, id: &DeadLetterId) -> Result<Option<DeadLetterItem>, QueueError>;

    /// Returns whether an item was removed
    async fn delete(&self, id: &DeadLetterId) -> Result<bool, QueueError>;

    /// Remove the item and return a fresh task at attempt 0
    async fn requeue(&self, id: &DeadLetterId) -> Result<Option<ReplayTask>, QueueError>;

    async fn stats(&self) -> Result<DeadLetterStats, QueueError>;
}

/// Dead-letter queue held in process memory
#[derive(Default)]
pub struct InMemoryDeadLetterQueue {
    items: RwLock<HashMap<DeadLetterId, DeadLetterItem>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[async_trait]
impl DeadLetterQueue for InMemoryDeadLetterQueue {
    async fn move_to_dead_letter(
        &self,
        task: ReplayTask,
        reason: &str,
    ) -> Result<DeadLetterItem, QueueError> {
        let item = DeadLetterItem {
            id: DeadLetterId::new(),
            last_error: task.last_error.clone(),
            task,
            reason: reason.to_string(),
            failed_at: Utc::now(),
        };

        info!(
            dead_letter_id = %item.id,
            delivery_id = %item.task.delivery.id(),
            attempts = item.task.attempt(),
            reason = %item.reason,
            "Task moved to dead-letter queue"
        );

        self.items.write().insert(item.id, item.clone());
        Ok(item)
    }

    async fn list(&self) -> Result<Vec<DeadLetterItem>, QueueError> {
        let mut items: Vec<_> = self.items.read().values().cloned().collect();
        items.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        Ok(items)
    }

    async fn get(&self, id: &DeadLetterId) -> Result<Option<DeadLetterItem>, QueueError> {
        Ok(self.items.read().get(id).cloned())
    }

    async fn delete(&self, id: &DeadLetterId) -> Result<bool, QueueError> {
        Ok(self.items.write().remove(id).is_some())
    }

    async fn requeue(&self, id: &DeadLetterId) -> Result<Option<ReplayTask>, QueueError> {
        let Some(item) = self.items.write().remove(id) else {
            return Ok(None);
        };

        info!(
            dead_letter_id = %id,
            delivery_id = %item.task.delivery.id(),
            "Dead-letter item requeued"
        );
        Ok(Some(ReplayTask::new(item.task.delivery)))
    }

    async fn stats(&self) -> Result<DeadLetterStats, QueueError> {
        let items = self.items.read();
        let mut stats = DeadLetterStats {
            total: items.len(),
            ..Default::default()
        };

        for item in items.values() {
            stats.oldest_failure = Some(match stats.oldest_failure {
                Some(oldest) => oldest.min(item.failed_at),
                None => item.failed_at,
            });
            stats.newest_failure = Some(match stats.newest_failure {
                Some(newest) => newest.max(item.failed_at),
                None => item.failed_at,
            });
            *stats
                .by_event
                .entry(item.task.delivery.event().to_string())
                .or_insert(0) += 1;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookwise_core::{DeliveryId, WebhookDelivery};

    fn exhausted(id: &str, event: &str) -> ReplayTask {
        let mut task = ReplayTask::new(WebhookDelivery::new(DeliveryId::new(id), event, b"{}".to_vec()));
        task.record_failure("handler failed");
        task.record_failure("handler failed again");
        task
    }

    #[tokio::test]
    async fn test_move_and_get() {
        let dlq = InMemoryDeadLetterQueue::new();
        let item = dlq
            .move_to_dead_letter(exhausted("d-1", "issues"), "retries exhausted")
            .await
            .unwrap();

        let fetched = dlq.get(&item.id).await.unwrap().unwrap();
        assert_eq!(fetched.reason, "retries exhausted");
        assert_eq!(fetched.last_error.as_deref(), Some("handler failed again"));
        assert_eq!(fetched.task.attempt(), 2);
        assert!(dlq.get(&DeadLetterId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let dlq = InMemoryDeadLetterQueue::new();
        let first = dlq.move_to_dead_letter(exhausted("a", "push"), "r").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = dlq.move_to_dead_letter(exhausted("b", "push"), "r").await.unwrap();

        let ids: Vec<_> = dlq.list().await.unwrap().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn test_delete() {
        let dlq = InMemoryDeadLetterQueue::new();
        let item = dlq.move_to_dead_letter(exhausted("a", "push"), "r").await.unwrap();

        assert!(dlq.delete(&item.id).await.unwrap());
        assert!(!dlq.delete(&item.id).await.unwrap());
        assert!(dlq.is_empty());
    }

    #[tokio::test]
    async fn test_requeue_resets_attempts_and_removes_item() {
        let dlq = InMemoryDeadLetterQueue::new();
        let item = dlq.move_to_dead_letter(exhausted("a", "push"), "r").await.unwrap();

        let task = dlq.requeue(&item.id).await.unwrap().unwrap();
        assert_eq!(task.attempt(), 0);
        assert_ne!(task.task_id, item.task.task_id);
        assert_eq!(task.delivery.id().as_str(), "a");
        assert!(task.last_error.is_none());

        assert!(dlq.get(&item.id).await.unwrap().is_none());
        assert!(dlq.requeue(&item.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats() {
        let dlq = InMemoryDeadLetterQueue::new();
        assert_eq!(dlq.stats().await.unwrap(), DeadLetterStats::default());

        dlq.move_to_dead_letter(exhausted("a", "push"), "r").await.unwrap();
        dlq.move_to_dead_letter(exhausted("b", "issues"), "r").await.unwrap();
        dlq.move_to_dead_letter(exhausted("c", "push"), "r").await.unwrap();

        let stats = dlq.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_event.get("push"), Some(&2));
        assert_eq!(stats.by_event.get("issues"), Some(&1));
        assert!(stats.oldest_failure <= stats.newest_failure);
    }

    #[test]
    fn test_dead_letter_id_parse() {
        let id = DeadLetterId::new();
        let parsed: DeadLetterId = id.to_string().parse().unwrap();

        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<DeadLetterId>().is_err());
    }
}
