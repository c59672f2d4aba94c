//! In-memory bucket storage.
//!
//! Buckets live in a [`DashMap`] and are updated while holding the entry lock, so checks are
//! atomic within the process. State is not shared between processes.

use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;

use super::{RateLimitResult, RateLimitStorage, StorageError};
use crate::bucket::{self, BucketState};

/// Buckets idle for at least this many minutes are indistinguishable from missing ones: a
/// refill of `60 * ceil(capacity / 60)` tokens always reaches capacity.
const IDLE_MINUTES: i64 = 60;

/// Number of buckets at which idle ones are swept, at most once per minute.
const SWEEP_THRESHOLD: usize = 10_000;

/// In-memory rate limit storage implementation.
#[derive(Debug)]
pub struct InMemoryStorage {
    buckets: DashMap<String, BucketState>,
    last_sweep_minute: AtomicI64,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self {
            buckets: DashMap::new(),
            last_sweep_minute: AtomicI64::new(i64::MIN),
        }
    }
}

impl InMemoryStorage {
    /// Create a new in-memory storage instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a bucket, if it exists.
    pub fn bucket(&self, key: &str) -> Option<BucketState> {
        self.buckets.get(key).map(|state| *state)
    }

    /// Number of buckets held.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no buckets are held.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Whether the caller won the sweep for `current_minute`. Only one check per minute does.
    fn claim_sweep(&self, current_minute: i64) -> bool {
        let last = self.last_sweep_minute.load(Ordering::Relaxed);

        last < current_minute
            && self
                .last_sweep_minute
                .compare_exchange(last, current_minute, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
    }

    fn sweep_idle(&self, current_minute: i64) {
        let before = self.buckets.len();

        self.buckets
            .retain(|_, state| current_minute.saturating_sub(state.last_update) < IDLE_MINUTES);

        log::debug!(
            "Swept idle rate limit buckets: {before} before, {} after",
            self.buckets.len()
        );
    }
}

impl RateLimitStorage for InMemoryStorage {
    async fn check_and_consume(
        &self,
        key: &str,
        capacity_per_hour: u32,
        current_minute: i64,
    ) -> Result<RateLimitResult, StorageError> {
        if self.buckets.len() >= SWEEP_THRESHOLD && self.claim_sweep(current_minute) {
            self.sweep_idle(current_minute);
        }

        let mut state = self.buckets.entry(key.to_string()).or_default();
        let update = bucket::consume(*state, capacity_per_hour, current_minute);
        update.apply(&mut state);

        log::debug!(
            "Bucket '{key}' at minute {current_minute}: {} tokens left, limited: {}",
            update.tokens,
            update.limited
        );

        Ok(RateLimitResult {
            allowed: !update.limited,
            remaining: update.tokens as u64,
        })
    }
}
