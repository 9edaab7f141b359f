pub mod config;
pub mod error;
pub mod idempotency;
pub mod storage;
pub mod types;

pub use config::*;
pub use error::{StoreError, StoreResult};
pub use idempotency::IdempotencyStore;
pub use storage::WebhookStorage;
pub use types::*;
