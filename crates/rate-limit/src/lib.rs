//! Tier and action aware rate limiting for Tollgate.
//!
//! This crate provides:
//! - A policy resolver mapping a caller tier and action to an hourly capacity
//! - A token bucket with lazy, minute-granular replenishment
//! - In-memory and Redis bucket storage, the latter with an optional atomic strict mode
//!
//! Storage failures never reject a request: the limiter fails open and logs the error.

#![deny(missing_docs)]

pub mod bucket;
mod clock;
mod error;
mod manager;
mod policy;
mod request;
mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Capacity;
pub use error::RateLimitError;
pub use manager::{RateLimitManager, RateLimitManagerBuilder};
pub use policy::{ConfigPolicySource, PolicyResolver, PolicySource, PolicyTable};
pub use request::{RateLimitRequest, RateLimitRequestBuilder};
pub use storage::{InMemoryStorage, RateLimitResult, RateLimitStorage, RedisStorage, StorageError};
