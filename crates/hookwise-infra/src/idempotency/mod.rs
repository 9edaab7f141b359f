pub mod memory;
pub mod redis;

pub use memory::{MemoryIdempotencyConfig, MemoryIdempotencyStore};
pub use redis::{RedisIdempotencyConfig, RedisIdempotencyStore};
