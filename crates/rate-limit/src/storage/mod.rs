//! Storage backends for rate limiting.

use std::time::Duration;

pub mod memory;
pub mod redis;
mod redis_pool;

pub use memory::InMemoryStorage;
pub use self::redis::RedisStorage;

/// Result of a bucket check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request is allowed.
    pub allowed: bool,
    /// Tokens left in the bucket after this check.
    pub remaining: u64,
}

/// Trait for rate limit storage backends.
#[allow(async_fn_in_trait)]
pub trait RateLimitStorage: Send + Sync {
    /// Refill the bucket for `key` up to `current_minute` and consume one token from it.
    async fn check_and_consume(
        &self,
        key: &str,
        capacity_per_hour: u32,
        current_minute: i64,
    ) -> Result<RateLimitResult, StorageError>;
}

/// Errors that can occur in storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Could not obtain a connection to the backend.
    #[error("Connection error: {0}")]
    Connection(String),
    /// A command against the backend failed.
    #[error("Query error: {0}")]
    Query(String),
    /// The backend did not answer in time.
    #[error("Storage did not respond within {0:?}")]
    Timeout(Duration),
}
