pub mod idempotency;
pub mod storage;

pub use idempotency::memory::{MemoryIdempotencyConfig, MemoryIdempotencyStore};
pub use idempotency::redis::{RedisIdempotencyConfig, RedisIdempotencyStore};
pub use storage::memory::InMemoryWebhookStorage;
