#![allow(clippy::panic)]

#[path = "rate_limiting/memory.rs"]
mod memory;
#[path = "rate_limiting/redis.rs"]
mod redis;
#[path = "rate_limiting/reload.rs"]
mod reload;
