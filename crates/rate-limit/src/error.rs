//! Error types for rate limiting.

use crate::storage::StorageError;
use std::time::Duration;

/// Errors that can occur during rate limiting.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// The caller's bucket is empty.
    #[error("Rate limit of {capacity} requests per hour exceeded for tier {tier}")]
    LimitExceeded {
        /// Tier of the caller.
        tier: u32,
        /// Action that was requested, if any.
        action: Option<String>,
        /// Hourly capacity that applied.
        capacity: u32,
        /// Time until the bucket refills, if it ever does.
        retry_after: Option<Duration>,
    },

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl RateLimitError {
    /// Get the retry-after duration if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::LimitExceeded { retry_after, .. } => *retry_after,
            Self::Storage(_) => None,
        }
    }
}
