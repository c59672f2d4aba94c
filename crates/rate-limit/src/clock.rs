//! Wall-clock access for the limiter.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use crate::bucket::MILLIS_PER_MINUTE;

/// Source of the current time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;

    /// Whole minutes since the Unix epoch.
    fn current_minute(&self) -> i64 {
        (self.now_millis() / MILLIS_PER_MINUTE) as i64
    }
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    /// A clock positioned at the start of the given minute.
    pub fn at_minute(minute: u64) -> Self {
        let clock = Self::default();
        clock.set_minute(minute);
        clock
    }

    /// Move to the start of the given minute.
    pub fn set_minute(&self, minute: u64) {
        self.set_millis(minute * MILLIS_PER_MINUTE);
    }

    /// Move to an exact millisecond.
    pub fn set_millis(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Move forward by whole minutes.
    pub fn advance_minutes(&self, minutes: u64) {
        self.millis.fetch_add(minutes * MILLIS_PER_MINUTE, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
