//! Webhook delivery and dispatch pipeline for hookwise
//!
//! This crate takes a raw webhook delivery from "untrusted" to "persisted"
//! and dispatches it to registered handlers:
//! - HMAC-SHA256 signature verification
//! - Duplicate suppression through an idempotency store
//! - Event routing with wildcard patterns
//! - Slash command parsing and routing for comment bodies
//! - Replay queue with exponential backoff and a dead-letter queue
//! - Layered repository configuration with `_extends` support
//!
//! # Example
//!
//! ```rust,ignore
//! use hookwise_webhook::{
//!     EventRegistry, PipelineOrchestrator, WebhookCommand, InMemoryReplayQueue,
//!     InMemoryDeadLetterQueue,
//! };
//!
//! let registry = EventRegistry::builder()
//!     .register_handler("issues", Some("opened"), "triage", Arc::new(TriageHandler))
//!     .register_handler("*", None, "audit", Arc::new(AuditHandler))
//!     .build();
//!
//! let orchestrator = PipelineOrchestrator::new(
//!     &config,
//!     Arc::new(registry),
//!     idempotency,
//!     storage,
//!     Arc::new(InMemoryReplayQueue::new(10_000)),
//!     Arc::new(InMemoryDeadLetterQueue::new()),
//! );
//!
//! let outcome = orchestrator
//!     .ingest(WebhookCommand::new(delivery_id, "issues", Some(signature), body))
//!     .await?;
//! ```

pub mod signature;
pub mod state;
pub mod events;
pub mod commands;
pub mod replay;
pub mod dead_letter;
pub mod pipeline;
pub mod worker;
pub mod cascade;
pub mod inbound;

pub use signature::*;
pub use state::*;
pub use events::*;
pub use commands::*;
pub use replay::*;
pub use dead_letter::*;
pub use pipeline::*;
pub use worker::*;
pub use cascade::*;
pub use inbound::*;

use hookwise_core::StoreError;
use thiserror::Error;

/// Pipeline errors
///
/// Only failures that the caller cannot treat as an outcome end up here.
/// Duplicates, rejections and not-found results are values, not errors.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Ingestion cancelled before {0}")]
    Cancelled(&'static str),
}

pub type Result<T> = std::result::Result<T, WebhookError>;
