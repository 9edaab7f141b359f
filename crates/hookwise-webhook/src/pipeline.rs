//! Pipeline orchestrator
//!
//! Drives a delivery through the ingestion states, dispatches persisted
//! deliveries and owns every retry/dead-letter decision. Lower components
//! never retry on their own.

use hookwise_core::{DeliveryId, HookwiseConfig, IdempotencyStore, StoreError, WebhookDelivery, WebhookStorage};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dead_letter::{DeadLetterId, DeadLetterItem, DeadLetterQueue, DeadLetterStats};
use crate::events::{DispatchReport, EventContext, EventRegistry, EventRouter};
use crate::replay::{QueueError, ReplayQueue, ReplayTask, RetryDecision, RetryPolicy};
use crate::signature::SignatureValidator;
use crate::state::{Persisted, Rejection, Untrusted, Validated, VerifiedUnique, WebhookCommand};
use crate::{Result, WebhookError};

/// Result of one ingestion or replay
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// Persisted and every matching handler succeeded
    Processed {
        delivery_id: DeliveryId,
        report: DispatchReport,
    },
    /// Already recorded within the TTL; nothing was done
    Duplicate { delivery_id: DeliveryId },
    /// Refused before persistence; never retried
    Rejected {
        delivery_id: DeliveryId,
        reason: Rejection,
    },
    /// Failed transiently and queued for another attempt
    RetryScheduled {
        delivery_id: DeliveryId,
        task_id: Uuid,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// Retry budget used up; operator action required
    DeadLettered {
        delivery_id: DeliveryId,
        dead_letter_id: DeadLetterId,
        error: String,
    },
}

impl IngestOutcome {
    pub fn delivery_id(&self) -> &DeliveryId {
        match self {
            IngestOutcome::Processed { delivery_id, .. }
            | IngestOutcome::Duplicate { delivery_id }
            | IngestOutcome::Rejected { delivery_id, .. }
            | IngestOutcome::RetryScheduled { delivery_id, .. }
            | IngestOutcome::DeadLettered { delivery_id, .. } => delivery_id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestOutcome::Duplicate { .. })
    }
}

/// Result of a manual replay request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayRequestOutcome {
    Enqueued { task_id: Uuid },
    NotFound,
}

pub struct PipelineOrchestrator {
    validator: SignatureValidator,
    idempotency_ttl: Duration,
    retry_policy: RetryPolicy,
    router: EventRouter,
    idempotency: Arc<dyn IdempotencyStore>,
    storage: Arc<dyn WebhookStorage>,
    replay_queue: Arc<dyn ReplayQueue>,
    dead_letters: Arc<dyn DeadLetterQueue>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: &HookwiseConfig,
        registry: Arc<EventRegistry>,
        idempotency: Arc<dyn IdempotencyStore>,
        storage: Arc<dyn WebhookStorage>,
        replay_queue: Arc<dyn ReplayQueue>,
        dead_letters: Arc<dyn DeadLetterQueue>,
    ) -> Self {
        info!(
            handlers = registry.len(),
            max_attempts = config.replay.max_attempts,
            "Webhook pipeline initialized"
        );

        Self {
            validator: SignatureValidator::new(&config.webhook.secret),
            idempotency_ttl: config.idempotency.ttl(),
            retry_policy: RetryPolicy::from_config(&config.replay),
            router: EventRouter::new(registry),
            idempotency,
            storage,
            replay_queue,
            dead_letters,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Ingest a fresh delivery
    pub async fn ingest(&self, command: WebhookCommand) -> Result<IngestOutcome> {
        self.ingest_with_cancel(command, &CancellationToken::new()).await
    }

    /// Ingest a fresh delivery, observing `cancel` before each store call.
    ///
    /// A cancelled ingestion never leaves its idempotency key recorded.
    pub async fn ingest_with_cancel(
        &self,
        command: WebhookCommand,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome> {
        let delivery_id = command.delivery_id.clone();

        let validated = match Untrusted::new(command)
            .and_then(|untrusted| Validated::verify(untrusted, &self.validator))
        {
            Ok(validated) => validated,
            Err(reason) => return Ok(rejected(delivery_id, reason)),
        };

        if cancel.is_cancelled() {
            return Err(WebhookError::Cancelled("idempotency check"));
        }

        let key = delivery_id.to_string();
        let metadata = json!({
            "event": validated.event(),
            "action": validated.action(),
        });
        let recorded = self
            .idempotency
            .record_with_metadata(&key, self.idempotency_ttl, Some(metadata))
            .await?;
        if !recorded {
            debug!(delivery_id = %delivery_id, "Duplicate delivery ignored");
            return Ok(IngestOutcome::Duplicate { delivery_id });
        }

        let unique = match VerifiedUnique::new(validated, key.as_str()) {
            Ok(unique) => unique,
            Err(reason) => {
                self.release_key(&key).await;
                return Ok(rejected(delivery_id, reason));
            }
        };

        if cancel.is_cancelled() {
            self.release_key(&key).await;
            return Err(WebhookError::Cancelled("persistence"));
        }

        let candidate = unique.to_delivery();
        let stored = match self.storage.save(&candidate).await {
            Ok(stored) => stored,
            Err(e) => return self.storage_failed(candidate, &key, e).await,
        };

        let persisted = match Persisted::new(unique, stored) {
            Ok(persisted) => persisted,
            Err(reason) => return Ok(rejected(delivery_id, reason)),
        };

        info!(
            delivery_id = %delivery_id,
            event = %persisted.delivery().qualified_event(),
            "Webhook accepted"
        );

        self.dispatch(&persisted, ReplayTask::new(persisted.delivery().clone()))
            .await
    }

    /// Take the next ready task off the replay queue and process it
    pub async fn replay_next(&self, cancel: &CancellationToken) -> Result<Option<IngestOutcome>> {
        match self.replay_queue.dequeue().await? {
            Some(task) => self.process_replay(task, cancel).await.map(Some),
            None => Ok(None),
        }
    }

    /// Process one replay task: same route as a fresh delivery minus the
    /// signature check.
    pub async fn process_replay(
        &self,
        task: ReplayTask,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome> {
        if cancel.is_cancelled() {
            return self.return_to_queue(task).await;
        }

        let delivery_id = task.delivery.id().clone();
        let validated = match Untrusted::from_delivery(&task.delivery).and_then(Validated::replayed) {
            Ok(validated) => validated,
            Err(reason) => return self.replay_rejected(task, reason).await,
        };

        let key = task.idempotency_key();
        let metadata = json!({
            "task_id": task.task_id,
            "attempt": task.attempt(),
        });
        let recorded = match self
            .idempotency
            .record_with_metadata(&key, self.idempotency_ttl, Some(metadata))
            .await
        {
            Ok(recorded) => recorded,
            Err(e) => return self.handle_failure(task, format!("idempotency check failed: {}", e)).await,
        };
        if !recorded {
            warn!(delivery_id = %delivery_id, key = %key, "Replay attempt already recorded");
            return self
                .dead_letter(task, "replay attempt already recorded".to_string())
                .await;
        }

        if cancel.is_cancelled() {
            self.release_key(&key).await;
            return self.return_to_queue(task).await;
        }

        let unique = match VerifiedUnique::new(validated, key.as_str()) {
            Ok(unique) => unique,
            Err(reason) => return self.replay_rejected(task, reason).await,
        };

        let stored = match self.storage.save(&task.delivery).await {
            Ok(stored) => stored,
            Err(e) => {
                error!(delivery_id = %delivery_id, error = %e, "Storage write failed during replay");
                return self.handle_failure(task, format!("storage write failed: {}", e)).await;
            }
        };

        let persisted = match Persisted::new(unique, stored) {
            Ok(persisted) => persisted,
            Err(reason) => return self.replay_rejected(task, reason).await,
        };

        info!(
            delivery_id = %delivery_id,
            task_id = %task.task_id,
            attempt = task.attempt(),
            "Replaying delivery"
        );

        self.dispatch(&persisted, task).await
    }

    /// Queue a stored delivery for reprocessing
    pub async fn request_replay(&self, delivery_id: &DeliveryId) -> Result<ReplayRequestOutcome> {
        let Some(delivery) = self.storage.get(delivery_id).await? else {
            debug!(delivery_id = %delivery_id, "Replay requested for unknown delivery");
            return Ok(ReplayRequestOutcome::NotFound);
        };

        let task = ReplayTask::new(delivery);
        let task_id = task.task_id;
        self.replay_queue.enqueue(task).await?;

        info!(delivery_id = %delivery_id, task_id = %task_id, "Manual replay enqueued");
        Ok(ReplayRequestOutcome::Enqueued { task_id })
    }

    pub async fn replay_queue_len(&self) -> Result<usize> {
        Ok(self.replay_queue.len().await?)
    }

    pub async fn dead_letter_stats(&self) -> Result<DeadLetterStats> {
        Ok(self.dead_letters.stats().await?)
    }

    pub async fn list_dead_letters(&self) -> Result<Vec<DeadLetterItem>> {
        Ok(self.dead_letters.list().await?)
    }

    pub async fn get_dead_letter(&self, id: &DeadLetterId) -> Result<Option<DeadLetterItem>> {
        Ok(self.dead_letters.get(id).await?)
    }

    pub async fn delete_dead_letter(&self, id: &DeadLetterId) -> Result<bool> {
        Ok(self.dead_letters.delete(id).await?)
    }

    /// Move a dead-lettered item back onto the replay queue at attempt 0
    pub async fn requeue_dead_letter(&self, id: &DeadLetterId) -> Result<Option<Uuid>> {
        let Some(task) = self.dead_letters.requeue(id).await? else {
            return Ok(None);
        };

        let task_id = task.task_id;
        if let Err(e) = self.replay_queue.enqueue(task.clone()).await {
            error!(dead_letter_id = %id, error = %e, "Requeue failed, restoring dead-letter item");
            self.dead_letters
                .move_to_dead_letter(task, &format!("requeue failed: {}", e))
                .await?;
            return Err(e.into());
        }

        Ok(Some(task_id))
    }

    async fn dispatch(&self, persisted: &Persisted, task: ReplayTask) -> Result<IngestOutcome> {
        let ctx = EventContext::new(persisted.delivery().clone(), persisted.payload().clone());
        let report = self.router.dispatch(&ctx).await;

        if report.is_success() {
            return Ok(IngestOutcome::Processed {
                delivery_id: persisted.delivery().id().clone(),
                report,
            });
        }

        self.handle_failure(task, report.failure_summary()).await
    }

    /// Retry-or-dead-letter for a task whose current attempt just failed
    async fn handle_failure(&self, mut task: ReplayTask, error: String) -> Result<IngestOutcome> {
        let decision = self.retry_policy.decide(task.attempt());
        task.record_failure(error.clone());

        match decision {
            RetryDecision::Retry { next_attempt, delay } => {
                task.delay_by(delay);
                match self.schedule_retry(task, next_attempt, delay, error).await {
                    Ok(outcome) => Ok(outcome),
                    Err((task, e)) => {
                        error!(delivery_id = %task.delivery.id(), error = %e, "Replay enqueue failed");
                        self.dead_letter(task, format!("replay enqueue failed: {}", e)).await
                    }
                }
            }
            RetryDecision::Exhausted { attempts } => {
                self.dead_letter(task, format!("retry budget exhausted after {} attempts", attempts))
                    .await
            }
        }
    }

    /// Enqueue an already delayed task. On failure the task is handed back.
    async fn schedule_retry(
        &self,
        task: ReplayTask,
        next_attempt: u32,
        delay: Duration,
        error: String,
    ) -> std::result::Result<IngestOutcome, (ReplayTask, QueueError)> {
        let delivery_id = task.delivery.id().clone();
        let task_id = task.task_id;

        if let Err(e) = self.replay_queue.enqueue(task.clone()).await {
            return Err((task, e));
        }

        warn!(
            delivery_id = %delivery_id,
            attempt = next_attempt,
            delay_ms = delay.as_millis().min(u64::MAX as u128) as u64,
            error = %error,
            "Delivery failed, retry scheduled"
        );
        Ok(IngestOutcome::RetryScheduled {
            delivery_id,
            task_id,
            attempt: next_attempt,
            delay,
            error,
        })
    }

    async fn dead_letter(&self, task: ReplayTask, reason: String) -> Result<IngestOutcome> {
        let delivery_id = task.delivery.id().clone();
        let error = task.last_error.clone().unwrap_or_else(|| reason.clone());

        error!(
            delivery_id = %delivery_id,
            attempts = task.attempt(),
            reason = %reason,
            "Delivery dead-lettered"
        );

        let item = self.dead_letters.move_to_dead_letter(task, &reason).await?;
        Ok(IngestOutcome::DeadLettered {
            delivery_id,
            dead_letter_id: item.id,
            error,
        })
    }

    /// The key is already recorded; the delivery goes to replay so that the
    /// replay path retries the write. If it cannot be queued the key is
    /// released for upstream redelivery and the storage error is returned.
    async fn storage_failed(
        &self,
        delivery: WebhookDelivery,
        key: &str,
        cause: StoreError,
    ) -> Result<IngestOutcome> {
        error!(delivery_id = %delivery.id(), error = %cause, "Storage write failed");

        let mut task = ReplayTask::new(delivery);
        let error = format!("storage write failed: {}", cause);
        let decision = self.retry_policy.decide(task.attempt());
        task.record_failure(error.clone());

        let outcome = match decision {
            RetryDecision::Retry { next_attempt, delay } => {
                task.delay_by(delay);
                self.schedule_retry(task, next_attempt, delay, error)
                    .await
                    .map_err(|(_, e)| WebhookError::Queue(e))
            }
            RetryDecision::Exhausted { attempts } => {
                self.dead_letter(task, format!("retry budget exhausted after {} attempts", attempts))
                    .await
            }
        };

        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(key = %key, error = %e, "Delivery could not be queued, releasing idempotency key");
                self.release_key(key).await;
                Err(WebhookError::Store(cause))
            }
        }
    }

    async fn replay_rejected(&self, task: ReplayTask, reason: Rejection) -> Result<IngestOutcome> {
        warn!(delivery_id = %task.delivery.id(), reason = %reason, "Replay task rejected");
        self.dead_letter(task, format!("replay rejected: {}", reason)).await
    }

    async fn return_to_queue(&self, task: ReplayTask) -> Result<IngestOutcome> {
        debug!(task_id = %task.task_id, "Replay cancelled, returning task to queue");
        self.replay_queue.enqueue(task).await?;
        Err(WebhookError::Cancelled("replay"))
    }

    async fn release_key(&self, key: &str) {
        if let Err(e) = self.idempotency.remove(key).await {
            error!(key = %key, error = %e, "Failed to release idempotency key");
        }
    }
}

fn rejected(delivery_id: DeliveryId, reason: Rejection) -> IngestOutcome {
    warn!(delivery_id = %delivery_id, reason = %reason, "Delivery rejected");
    IngestOutcome::Rejected { delivery_id, reason }
}
