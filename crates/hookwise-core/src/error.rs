//! Errors shared by the storage and idempotency ports.

use thiserror::Error;

/// Failure reported by a backing store.
///
/// Every variant is transient from the pipeline's point of view: the
/// orchestrator turns it into a retryable failure and never into a rejection.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
