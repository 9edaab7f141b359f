//! Replay queue and retry policy
//!
//! Failed deliveries become [`ReplayTask`]s. The orchestrator owns the retry
//! decision; queues only store and hand back tasks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookwise_core::{ReplayConfig, WebhookDelivery};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Queue failures. Never swallowed: the caller decides what happens next.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue is full (capacity {capacity})")]
    Full { capacity: usize },

    #[error("Queue backend error: {0}")]
    Backend(String),
}

/// A delivery waiting to be processed again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayTask {
    pub task_id: Uuid,
    pub delivery: WebhookDelivery,
    /// Failed attempts so far; only ever increases
    attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Not eligible for dequeue before this instant
    pub not_before: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl ReplayTask {
    pub fn new(delivery: WebhookDelivery) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4(),
            delivery,
            attempt: 0,
            enqueued_at: now,
            not_before: now,
            last_error: None,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Count one more failed attempt
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.attempt = self.attempt.saturating_add(1);
        self.last_error = Some(error.into());
    }

    /// Hold the task back for `delay` from now
    pub fn delay_by(&mut self, delay: Duration) {
        let now = Utc::now();
        self.enqueued_at = now;
        self.not_before = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready_at(Utc::now())
    }

    /// Idempotency key for processing this attempt of this task
    pub fn idempotency_key(&self) -> String {
        format!("{}:replay:{}:{}", self.delivery.id(), self.task_id, self.attempt)
    }
}

/// FIFO store of replay tasks
#[async_trait]
pub trait ReplayQueue: Send + Sync {
    async fn enqueue(&self, task: ReplayTask) -> Result<(), QueueError>;

    /// Oldest task whose delay has elapsed, if any
    async fn dequeue(&self) -> Result<Option<ReplayTask>, QueueError>;

    async fn len(&self) -> Result<usize, QueueError>;

    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }
}

/// Replay queue held in process memory
pub struct InMemoryReplayQueue {
    tasks: Mutex<VecDeque<ReplayTask>>,
    capacity: usize,
}

impl InMemoryReplayQueue {
    /// `capacity` of 0 means unbounded
    pub fn new(capacity: usize) -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Queue bounded by `replay.queue_capacity`
    pub fn from_config(config: &ReplayConfig) -> Self {
        Self::new(config.queue_capacity)
    }

    /// Copy of the queued tasks, front first
    pub fn snapshot(&self) -> Vec<ReplayTask> {
        self.tasks.lock().iter().cloned().collect()
    }
}

impl Default for InMemoryReplayQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[async_trait]
impl ReplayQueue for InMemoryReplayQueue {
    async fn enqueue(&self, task: ReplayTask) -> Result<(), QueueError> {
        let mut tasks = self.tasks.lock();
        if self.capacity > 0 && tasks.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }

        debug!(
            task_id = %task.task_id,
            delivery_id = %task.delivery.id(),
            attempt = task.attempt,
            "Replay task enqueued"
        );
        tasks.push_back(task);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<ReplayTask>, QueueError> {
        let now = Utc::now();
        let mut tasks = self.tasks.lock();
        let ready = tasks.iter().position(|t| t.is_ready_at(now));
        Ok(ready.and_then(|index| tasks.remove(index)))
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.tasks.lock().len())
    }
}

/// What to do with a task that just failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { next_attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

/// Exponential backoff with a cap
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ReplayConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ReplayConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// `base_delay * 2^attempt`, capped at `max_delay`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }

    /// Decide for a task whose attempt number `attempt` just failed
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        let next_attempt = attempt.saturating_add(1);
        if next_attempt < self.max_attempts {
            RetryDecision::Retry {
                next_attempt,
                delay: self.delay_for(attempt),
            }
        } else {
            RetryDecision::Exhausted {
                attempts: next_attempt,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookwise_core::DeliveryId;

    fn task(id: &str) -> ReplayTask {
        ReplayTask::new(WebhookDelivery::new(DeliveryId::new(id), "push", b"{}".to_vec()))
    }

    #[test]
    fn test_task_starts_at_zero() {
        let task = task("d-1");
        assert_eq!(task.attempt(), 0);
        assert!(task.is_ready());
        assert!(task.last_error.is_none());
    }

    #[test]
    fn test_record_failure_increments() {
        let mut task = task("d-1");
        task.record_failure("first");
        task.record_failure("second");

        assert_eq!(task.attempt(), 2);
        assert_eq!(task.last_error.as_deref(), Some("second"));
    }

    #[test]
    fn test_delay_by_holds_task_back() {
        let mut task = task("d-1");
        task.delay_by(Duration::from_secs(60));

        assert!(!task.is_ready());
        assert!(task.is_ready_at(Utc::now() + chrono::Duration::seconds(61)));
    }

    #[test]
    fn test_idempotency_key_changes_per_attempt() {
        let mut task = task("d-1");
        let first = task.idempotency_key();
        task.record_failure("boom");

        assert!(first.starts_with("d-1:replay:"));
        assert_ne!(first, task.idempotency_key());
    }

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let queue = InMemoryReplayQueue::unbounded();
        queue.enqueue(task("a")).await.unwrap();
        queue.enqueue(task("b")).await.unwrap();

        assert_eq!(queue.dequeue().await.unwrap().unwrap().delivery.id().as_str(), "a");
        assert_eq!(queue.dequeue().await.unwrap().unwrap().delivery.id().as_str(), "b");
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queue_skips_delayed_tasks() {
        let queue = InMemoryReplayQueue::unbounded();
        let mut delayed = task("later");
        delayed.delay_by(Duration::from_secs(3600));
        queue.enqueue(delayed).await.unwrap();
        queue.enqueue(task("now")).await.unwrap();

        let ready = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(ready.delivery.id().as_str(), "now");
        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queue_reports_full() {
        let queue = InMemoryReplayQueue::new(1);
        queue.enqueue(task("a")).await.unwrap();

        let err = queue.enqueue(task("b")).await.unwrap_err();
        assert_eq!(err, QueueError::Full { capacity: 1 });
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_queue_capacity_from_config() {
        let config = ReplayConfig {
            queue_capacity: 2,
            ..Default::default()
        };
        let queue = InMemoryReplayQueue::from_config(&config);
        queue.enqueue(task("a")).await.unwrap();
        queue.enqueue(task("b")).await.unwrap();

        let err = queue.enqueue(task("c")).await.unwrap_err();
        assert_eq!(err, QueueError::Full { capacity: 2 });
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(10));

        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(4), Duration::from_secs(10));
        assert_eq!(policy.delay_for(64), Duration::from_secs(10));
    }

    #[test]
    fn test_decide_exhausts_at_max() {
        let policy = RetryPolicy::default()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(100));

        assert_eq!(
            policy.decide(0),
            RetryDecision::Retry {
                next_attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            policy.decide(1),
            RetryDecision::Retry {
                next_attempt: 2,
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(policy.decide(2), RetryDecision::Exhausted { attempts: 3 });
    }

    #[test]
    fn test_policy_from_config() {
        let config = ReplayConfig::default().with_max_attempts(7);
        let policy = RetryPolicy::from_config(&config);

        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(3600));
    }
}
