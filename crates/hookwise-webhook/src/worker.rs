//! Background replay consumer
//!
//! A single loop drains the replay queue at a fixed poll interval, one task
//! at a time, feeding each task back through the orchestrator.

use std::sync::Arc;
use std::time::Duration;
use hookwise_core::ReplayConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::pipeline::PipelineOrchestrator;
use crate::WebhookError;

pub struct ReplayWorker {
    orchestrator: Arc<PipelineOrchestrator>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl ReplayWorker {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>, poll_interval: Duration) -> Self {
        Self {
            orchestrator,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            cancel: CancellationToken::new(),
        }
    }

    /// Worker polling at `replay.poll_interval_ms`
    pub fn from_config(orchestrator: Arc<PipelineOrchestrator>, config: &ReplayConfig) -> Self {
        Self::new(orchestrator, config.poll_interval())
    }

    /// Use an externally owned token, e.g. the process shutdown token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the loop when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Poll until cancelled
    pub async fn run(&self) {
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "Replay worker started");
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let processed = self.run_once().await;
                    if processed > 0 {
                        debug!(processed, "Replay pass finished");
                    }
                }
            }
        }

        info!("Replay worker stopped");
    }

    /// Process the tasks that are ready now. Returns how many were handled.
    ///
    /// Bounded by the queue length at the start of the pass so that tasks
    /// re-enqueued with no delay wait for the next tick.
    pub async fn run_once(&self) -> usize {
        let budget = match self.orchestrator.replay_queue_len().await {
            Ok(len) => len,
            Err(e) => {
                error!(error = %e, "Replay queue unavailable");
                return 0;
            }
        };

        let mut processed = 0;
        while processed < budget && !self.cancel.is_cancelled() {
            match self.orchestrator.replay_next(&self.cancel).await {
                Ok(Some(_)) => processed += 1,
                Ok(None) => break,
                Err(WebhookError::Cancelled(_)) => break,
                Err(e) => {
                    error!(error = %e, "Replay failed");
                    break;
                }
            }
        }

        processed
    }
}
