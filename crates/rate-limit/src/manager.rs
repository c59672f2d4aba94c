//! Rate limit manager implementation.

use std::sync::Arc;

use config::{Capacity, RateLimitConfig, StorageConfig};

use crate::bucket;
use crate::clock::{Clock, SystemClock};
use crate::error::RateLimitError;
use crate::policy::{ConfigPolicySource, PolicyResolver, PolicySource};
use crate::request::{RateLimitRequest, bucket_key};
use crate::storage::{InMemoryStorage, RateLimitResult, RateLimitStorage, RedisStorage, StorageError};

/// Storage backend for rate limiting.
enum Storage {
    Memory(InMemoryStorage),
    Redis(RedisStorage),
}

impl Storage {
    async fn check_and_consume(
        &self,
        key: &str,
        capacity_per_hour: u32,
        current_minute: i64,
    ) -> Result<RateLimitResult, StorageError> {
        match self {
            Storage::Memory(storage) => storage.check_and_consume(key, capacity_per_hour, current_minute).await,
            Storage::Redis(storage) => storage.check_and_consume(key, capacity_per_hour, current_minute).await,
        }
    }
}

/// Composes policy resolution and the token bucket.
pub struct RateLimitManager {
    config: Arc<RateLimitConfig>,
    resolver: PolicyResolver,
    storage: Storage,
    clock: Arc<dyn Clock>,
}

/// Builder for [`RateLimitManager`].
pub struct RateLimitManagerBuilder {
    config: Arc<RateLimitConfig>,
    policy_source: Option<Arc<dyn PolicySource>>,
    clock: Arc<dyn Clock>,
}

impl RateLimitManagerBuilder {
    /// Use a different source for tier defaults and the policy document.
    pub fn policy_source(mut self, source: Arc<dyn PolicySource>) -> Self {
        self.policy_source = Some(source);
        self
    }

    /// Use a different clock.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Create the storage backend and the manager.
    pub async fn build(self) -> Result<RateLimitManager, RateLimitError> {
        let storage = match &self.config.storage {
            StorageConfig::Memory => Storage::Memory(InMemoryStorage::new()),
            StorageConfig::Redis(redis_config) => Storage::Redis(RedisStorage::new(redis_config).await?),
        };

        let source = self
            .policy_source
            .unwrap_or_else(|| Arc::new(ConfigPolicySource::new(self.config.clone())));

        Ok(RateLimitManager {
            config: self.config,
            resolver: PolicyResolver::new(source),
            storage,
            clock: self.clock,
        })
    }
}

impl RateLimitManager {
    /// Create a new rate limit manager with the configured storage backend.
    pub async fn new(config: RateLimitConfig) -> Result<Self, RateLimitError> {
        Self::builder(config).build().await
    }

    /// A builder for customizing the policy source or the clock.
    pub fn builder(config: RateLimitConfig) -> RateLimitManagerBuilder {
        RateLimitManagerBuilder {
            config: Arc::new(config),
            policy_source: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Whether rate limiting is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// The policy resolver, for capacity lookups and reloads.
    pub fn resolver(&self) -> &PolicyResolver {
        &self.resolver
    }

    /// Check a caller against its bucket, consuming a token. Returns `true` when allowed.
    pub async fn check_and_consume(&self, identity: &str, tier: u32, action: Option<&str>) -> bool {
        let request = RateLimitRequest {
            identity: identity.to_string(),
            tier,
            action: action.map(str::to_string),
        };

        self.check_request(&request).await.is_ok()
    }

    /// Check a request, returning [`RateLimitError::LimitExceeded`] when it must be rejected.
    ///
    /// Storage failures are logged and the request is allowed.
    pub async fn check_request(&self, request: &RateLimitRequest) -> Result<(), RateLimitError> {
        if !self.is_enabled() {
            return Ok(());
        }

        let action = request.action.as_deref();
        let capacity = self.resolver.resolve_capacity(request.tier, action);

        let Some(limit) = capacity.per_hour() else {
            log::debug!("No rate limit for tier {} and action {action:?}", request.tier);
            return Ok(());
        };

        let key = bucket_key(&request.identity, action);

        if !self.is_rate_limited(&key, capacity).await {
            return Ok(());
        }

        log::debug!(
            "Rate limited '{}' (tier {}, action {action:?}) at {capacity}",
            request.identity,
            request.tier
        );

        Err(RateLimitError::LimitExceeded {
            tier: request.tier,
            action: request.action.clone(),
            capacity: limit,
            retry_after: bucket::retry_after(limit, self.clock.now_millis()),
        })
    }

    /// Consume a token from `bucket_key` and report whether the caller is limited.
    ///
    /// Unlimited capacities never touch storage. Storage errors are logged and reported as
    /// not limited.
    pub async fn is_rate_limited(&self, bucket_key: &str, capacity: Capacity) -> bool {
        let Some(limit) = capacity.per_hour() else {
            return false;
        };

        let current_minute = self.clock.current_minute();

        match self.storage.check_and_consume(bucket_key, limit, current_minute).await {
            Ok(result) => !result.allowed,
            Err(e) => {
                log::error!("Rate limit storage failed for bucket '{bucket_key}', allowing the request: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use config::{PolicyError, RedisConfig};
    use indoc::indoc;

    use super::*;
    use crate::bucket::BucketState;
    use crate::clock::ManualClock;

    const NOW: u64 = 29_000_000;

    fn rate_limit_config(policy: &str) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            default_capacity_tiers: vec![Capacity::PerHour(3), Capacity::PerHour(60)],
            policy: Some(policy.to_string()),
            ..Default::default()
        }
    }

    const POLICY: &str = indoc! {r#"
        {
          "rateLimits": [
            {
              "tier": 1,
              "actions": [
                { "name": "export", "limitPerHour": 2 },
                { "name": "blocked", "limitPerHour": 0 },
                { "name": "free", "limitPerHour": "unlimited" }
              ]
            }
          ]
        }
    "#};

    async fn manager(clock: &ManualClock) -> RateLimitManager {
        RateLimitManager::builder(rate_limit_config(POLICY))
            .clock(clock.clone())
            .build()
            .await
            .unwrap()
    }

    fn bucket(manager: &RateLimitManager, key: &str) -> Option<BucketState> {
        match &manager.storage {
            Storage::Memory(storage) => storage.bucket(key),
            Storage::Redis(_) => None,
        }
    }

    #[tokio::test]
    async fn first_call_admits_and_leaves_capacity_minus_one() {
        let clock = ManualClock::at_minute(NOW);
        let manager = manager(&clock).await;

        assert!(manager.check_and_consume("alice", 1, None).await);

        assert_eq!(
            bucket(&manager, "alice:"),
            Some(BucketState {
                tokens: 59,
                last_update: NOW as i64
            })
        );
    }

    #[tokio::test]
    async fn same_minute_drains_then_denies() {
        let clock = ManualClock::at_minute(NOW);
        let manager = manager(&clock).await;

        let results = decisions(&manager, "alice", 1, Some("export"), 5).await;

        assert_eq!(results, vec![true, true, false, false, false]);
        assert_eq!(bucket(&manager, "alice:export").map(|s| s.tokens), Some(0));
    }

    async fn decisions(
        manager: &RateLimitManager,
        identity: &str,
        tier: u32,
        action: Option<&str>,
        count: usize,
    ) -> Vec<bool> {
        let mut decisions = Vec::with_capacity(count);

        for _ in 0..count {
            decisions.push(manager.check_and_consume(identity, tier, action).await);
        }

        decisions
    }

    #[tokio::test]
    async fn refills_after_minutes_pass() {
        let clock = ManualClock::at_minute(NOW);
        let manager = manager(&clock).await;

        // Tier 0 has 3 per hour: one token a minute.
        assert_eq!(
            decisions(&manager, "bob", 0, None, 4).await,
            vec![true, true, true, false]
        );

        clock.advance_minutes(1);
        assert_eq!(decisions(&manager, "bob", 0, None, 2).await, vec![true, false]);

        clock.advance_minutes(120);
        assert_eq!(
            decisions(&manager, "bob", 0, None, 4).await,
            vec![true, true, true, false]
        );
    }

    #[tokio::test]
    async fn sixty_per_hour_after_five_minutes() {
        let clock = ManualClock::at_minute(NOW);
        let manager = manager(&clock).await;

        // Drain the 60/hour tier 1 default bucket.
        for _ in 0..60 {
            assert!(manager.check_and_consume("carol", 1, Some("search")).await);
        }

        assert!(!manager.check_and_consume("carol", 1, Some("search")).await);

        clock.advance_minutes(5);
        assert!(manager.check_and_consume("carol", 1, Some("search")).await);

        assert_eq!(
            bucket(&manager, "carol:search"),
            Some(BucketState {
                tokens: 4,
                last_update: NOW as i64 + 5
            })
        );
    }

    #[tokio::test]
    async fn buckets_are_per_action() {
        let clock = ManualClock::at_minute(NOW);
        let manager = manager(&clock).await;

        assert_eq!(
            decisions(&manager, "dave", 1, Some("export"), 3).await,
            vec![true, true, false]
        );
        assert!(manager.check_and_consume("dave", 1, Some("search")).await);
        assert!(manager.check_and_consume("erin", 1, Some("export")).await);
    }

    #[tokio::test]
    async fn identities_with_separators_do_not_share_buckets() {
        let clock = ManualClock::at_minute(NOW);
        let manager = manager(&clock).await;

        assert_eq!(
            decisions(&manager, "a:b", 0, Some("c"), 4).await,
            vec![true, true, true, false]
        );
        assert!(manager.check_and_consume("a", 0, Some("b:c")).await);

        assert!(bucket(&manager, "a%3Ab:c").is_some());
        assert!(bucket(&manager, "a:b:c").is_some());
    }

    #[tokio::test]
    async fn zero_capacity_always_denies() {
        let clock = ManualClock::at_minute(NOW);
        let manager = manager(&clock).await;

        assert!(!manager.check_and_consume("frank", 1, Some("blocked")).await);

        clock.advance_minutes(600);
        assert!(!manager.check_and_consume("frank", 1, Some("blocked")).await);
    }

    #[tokio::test]
    async fn unlimited_never_touches_storage() {
        let clock = ManualClock::at_minute(NOW);
        let manager = manager(&clock).await;

        for _ in 0..1000 {
            assert!(manager.check_and_consume("grace", 1, Some("free")).await);
            assert!(manager.check_and_consume("grace", 9, None).await);
        }

        let Storage::Memory(storage) = &manager.storage else {
            unreachable!("memory storage is configured");
        };

        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn disabled_admits_everything() {
        let mut config = rate_limit_config(POLICY);
        config.enabled = false;

        let manager = RateLimitManager::new(config).await.unwrap();

        for _ in 0..10 {
            assert!(manager.check_and_consume("heidi", 1, Some("blocked")).await);
        }
    }

    #[tokio::test]
    async fn limit_exceeded_error() {
        let clock = ManualClock::default();
        clock.set_millis(NOW * 60_000 + 20_000);
        let manager = manager(&clock).await;

        let request = RateLimitRequest::builder("ivan").tier(1).action("export").build();

        manager.check_request(&request).await.unwrap();
        manager.check_request(&request).await.unwrap();

        let error = manager.check_request(&request).await.unwrap_err();

        insta::assert_debug_snapshot!(error, @r#"
        LimitExceeded {
            tier: 1,
            action: Some(
                "export",
            ),
            capacity: 2,
            retry_after: Some(
                40s,
            ),
        }
        "#);

        insta::assert_snapshot!(error, @"Rate limit of 2 requests per hour exceeded for tier 1");
    }

    #[tokio::test]
    async fn zero_capacity_has_no_retry_after() {
        let manager = manager(&ManualClock::at_minute(NOW)).await;
        let request = RateLimitRequest::builder("judy").tier(1).action("blocked").build();

        let error = manager.check_request(&request).await.unwrap_err();

        assert_eq!(error.retry_after(), None);
    }

    #[tokio::test]
    async fn unreachable_redis_fails_open() {
        let config = RateLimitConfig {
            storage: StorageConfig::Redis(Box::new(RedisConfig {
                url: "redis://127.0.0.1:1/0".to_string(),
                ..Default::default()
            })),
            ..rate_limit_config(POLICY)
        };

        let manager = RateLimitManager::new(config).await.unwrap();

        for _ in 0..5 {
            assert!(manager.check_and_consume("mallory", 1, Some("blocked")).await);
            assert!(manager.check_and_consume("mallory", 1, Some("export")).await);
        }
    }

    struct FixedSource;

    impl PolicySource for FixedSource {
        fn default_capacity(&self, _tier: u32) -> Capacity {
            Capacity::PerHour(1)
        }

        fn policy_document(&self) -> Result<Option<String>, PolicyError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn custom_policy_source() {
        let manager = RateLimitManager::builder(rate_limit_config(POLICY))
            .policy_source(Arc::new(FixedSource))
            .clock(ManualClock::at_minute(NOW))
            .build()
            .await
            .unwrap();

        assert!(manager.check_and_consume("oscar", 1, Some("export")).await);
        assert!(!manager.check_and_consume("oscar", 1, Some("export")).await);
        assert_eq!(manager.resolver().load_count(), 1);
    }
}
