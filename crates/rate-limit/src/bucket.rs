//! Token bucket arithmetic.
//!
//! Buckets refill lazily: nothing runs in the background, and each check computes how many
//! whole minutes passed since the last refill. The refill rate is `ceil(capacity / 60)` tokens
//! per minute and the bucket never holds more than `capacity` tokens.
//!
//! A missing bucket reads as zero tokens last refilled at minute zero, so the first check for a
//! new key refills it to full capacity.

use std::time::Duration;

/// Milliseconds in one minute.
pub const MILLIS_PER_MINUTE: u64 = 60_000;

/// Bucket state as persisted by a storage backend.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    /// Whole tokens currently in the bucket.
    pub tokens: i64,
    /// Minute of the last refill, in minutes since the Unix epoch.
    pub last_update: i64,
}

/// Outcome of consuming from a bucket, and what has to be written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketUpdate {
    /// Token count to persist.
    pub tokens: i64,
    /// New refill minute to persist, when tokens were added.
    pub last_update: Option<i64>,
    /// Whether the request is rate limited.
    pub limited: bool,
}

impl BucketUpdate {
    /// Applies the update to the state it was computed from.
    pub fn apply(&self, state: &mut BucketState) {
        state.tokens = self.tokens;

        if let Some(last_update) = self.last_update {
            state.last_update = last_update;
        }
    }
}

/// Tokens added per elapsed minute for an hourly capacity.
pub fn tokens_per_minute(capacity: u32) -> i64 {
    i64::from(capacity.div_ceil(60))
}

/// Refills the bucket for the elapsed minutes and consumes one token.
///
/// The refill minute only moves when tokens are actually added, so repeated calls within the
/// same minute (or with a clock that went backwards) never refill. One token is consumed on
/// every call, including limited ones, without going below zero.
pub fn consume(state: BucketState, capacity: u32, current_minute: i64) -> BucketUpdate {
    let elapsed = current_minute.saturating_sub(state.last_update);
    let tokens_to_add = elapsed.saturating_mul(tokens_per_minute(capacity));

    let (tokens, last_update) = if tokens_to_add > 0 {
        let refilled = state.tokens.saturating_add(tokens_to_add).min(i64::from(capacity));
        (refilled, Some(current_minute))
    } else {
        (state.tokens, None)
    };

    BucketUpdate {
        tokens: (tokens - 1).max(0),
        last_update,
        limited: tokens < 1,
    }
}

/// How long a limited caller should wait before tokens are added again.
///
/// `None` when the bucket never refills (a capacity of zero).
pub fn retry_after(capacity: u32, now_millis: u64) -> Option<Duration> {
    if tokens_per_minute(capacity) == 0 {
        return None;
    }

    let into_minute = now_millis % MILLIS_PER_MINUTE;
    let remaining_millis = MILLIS_PER_MINUTE - into_minute;

    Some(Duration::from_secs(remaining_millis.div_ceil(1000)))
}
