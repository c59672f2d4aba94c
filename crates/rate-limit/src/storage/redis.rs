//! Redis-based bucket storage.
//!
//! Each bucket uses two plain integer keys: `{prefix}{key}` holds the token count and
//! `{prefix}{key}:last_update` the minute of the last refill.
//!
//! In the default mode both values are read in one pipeline and written back in another.
//! Concurrent checks on the same key may interleave between the two, which can admit a few
//! extra requests. Strict mode runs the whole update as a Lua script, atomically.

use std::time::Duration;

use config::RedisConfig;
use redis::{Pipeline, RedisError, Script};

use super::redis_pool::{Pool, create_pool};
use super::{RateLimitResult, RateLimitStorage, StorageError};
use crate::bucket::{self, BucketState};

const CONSUME_SCRIPT: &str = r#"
local capacity = tonumber(ARGV[1])
local tokens_per_minute = tonumber(ARGV[2])
local current_minute = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])

local function store(key, value)
  if ttl > 0 then
    redis.call('SET', key, string.format('%d', value), 'EX', ttl)
  else
    redis.call('SET', key, string.format('%d', value))
  end
end

local last_update = tonumber(redis.call('GET', KEYS[2]) or '0')
local tokens = tonumber(redis.call('GET', KEYS[1]) or '0')

local tokens_to_add = (current_minute - last_update) * tokens_per_minute

if tokens_to_add > 0 then
  tokens = math.min(capacity, tokens + tokens_to_add)
  store(KEYS[2], current_minute)
end

local remaining = math.max(0, tokens - 1)
store(KEYS[1], remaining)

if tokens < 1 then
  return {0, remaining}
end

return {1, remaining}
"#;

/// Redis-based rate limit storage implementation.
pub struct RedisStorage {
    pool: Pool,
    key_prefix: String,
    response_timeout: Duration,
    strict: bool,
    key_ttl: Option<Duration>,
    script: Script,
}

impl RedisStorage {
    /// Create a new Redis storage instance.
    ///
    /// An unreachable server is not an error here: checks fail open until it comes back.
    pub async fn new(config: &RedisConfig) -> Result<Self, StorageError> {
        let pool = create_pool(config)
            .map_err(|e| StorageError::Connection(format!("Failed to create Redis connection pool: {e}")))?;

        let storage = Self {
            pool,
            key_prefix: config.key_prefix.clone(),
            response_timeout: config.response_timeout,
            strict: config.strict,
            key_ttl: config.key_ttl,
            script: Script::new(CONSUME_SCRIPT),
        };

        match storage.ping().await {
            Ok(()) => log::debug!("Connected to Redis rate limit storage (strict mode: {})", storage.strict),
            Err(e) => log::warn!("Redis rate limit storage is not reachable, requests will be admitted until it is: {e}"),
        }

        Ok(storage)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e: RedisError| StorageError::Query(e.to_string()))?;

        Ok(())
    }

    /// The token count and last update keys for a bucket.
    fn bucket_keys(&self, key: &str) -> (String, String) {
        let tokens_key = format!("{}{key}", self.key_prefix);
        let last_update_key = format!("{tokens_key}:last_update");

        (tokens_key, last_update_key)
    }

    fn ttl_seconds(&self) -> u64 {
        self.key_ttl.map(|ttl| ttl.as_secs()).unwrap_or(0)
    }

    fn set(&self, pipe: &mut Pipeline, key: &str, value: i64) {
        match self.ttl_seconds() {
            0 => pipe.set(key, value).ignore(),
            ttl => pipe.set_ex(key, value, ttl).ignore(),
        };
    }

    async fn consume_pipelined(
        &self,
        key: &str,
        capacity_per_hour: u32,
        current_minute: i64,
    ) -> Result<RateLimitResult, StorageError> {
        let (tokens_key, last_update_key) = self.bucket_keys(key);

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let (last_update, tokens): (Option<i64>, Option<i64>) = redis::pipe()
            .get(&last_update_key)
            .get(&tokens_key)
            .query_async(&mut *conn)
            .await
            .map_err(|e: RedisError| StorageError::Query(e.to_string()))?;

        let state = BucketState {
            tokens: tokens.unwrap_or(0),
            last_update: last_update.unwrap_or(0),
        };

        let update = bucket::consume(state, capacity_per_hour, current_minute);
        let mut pipe = redis::pipe();

        if let Some(last_update) = update.last_update {
            self.set(&mut pipe, &last_update_key, last_update);
        }

        self.set(&mut pipe, &tokens_key, update.tokens);

        pipe.query_async::<()>(&mut *conn)
            .await
            .map_err(|e: RedisError| StorageError::Query(e.to_string()))?;

        Ok(RateLimitResult {
            allowed: !update.limited,
            remaining: update.tokens as u64,
        })
    }

    async fn consume_scripted(
        &self,
        key: &str,
        capacity_per_hour: u32,
        current_minute: i64,
    ) -> Result<RateLimitResult, StorageError> {
        let (tokens_key, last_update_key) = self.bucket_keys(key);

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let (allowed, remaining): (i64, i64) = self
            .script
            .key(&tokens_key)
            .key(&last_update_key)
            .arg(capacity_per_hour)
            .arg(bucket::tokens_per_minute(capacity_per_hour))
            .arg(current_minute)
            .arg(self.ttl_seconds())
            .invoke_async(&mut *conn)
            .await
            .map_err(|e: RedisError| StorageError::Query(e.to_string()))?;

        Ok(RateLimitResult {
            allowed: allowed == 1,
            remaining: remaining.max(0) as u64,
        })
    }
}

impl RateLimitStorage for RedisStorage {
    async fn check_and_consume(
        &self,
        key: &str,
        capacity_per_hour: u32,
        current_minute: i64,
    ) -> Result<RateLimitResult, StorageError> {
        let check = async {
            if self.strict {
                self.consume_scripted(key, capacity_per_hour, current_minute).await
            } else {
                self.consume_pipelined(key, capacity_per_hour, current_minute).await
            }
        };

        let result = tokio::time::timeout(self.response_timeout, check)
            .await
            .map_err(|_| StorageError::Timeout(self.response_timeout))??;

        log::debug!(
            "Bucket '{key}' at minute {current_minute}: {} tokens left, allowed: {}",
            result.remaining,
            result.allowed
        );

        Ok(result)
    }
}
