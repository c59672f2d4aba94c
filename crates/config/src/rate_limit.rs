//! Rate limiting configuration structures.

use std::{path::PathBuf, time::Duration};

use duration_str::{deserialize_duration, deserialize_option_duration};
use serde::{Deserialize, Serialize};

use crate::{Capacity, PolicyError};

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled. When disabled every check is admitted.
    #[serde(default)]
    pub enabled: bool,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Default hourly capacity per tier, indexed by tier number.
    #[serde(default)]
    pub default_capacity_tiers: Vec<Capacity>,
    /// Inline JSON policy document.
    pub policy: Option<String>,
    /// Path to a JSON policy document, re-read on every policy reload.
    pub policy_path: Option<PathBuf>,
}

impl RateLimitConfig {
    /// The default hourly capacity for a tier. Tiers outside the table are unlimited.
    pub fn default_capacity(&self, tier: u32) -> Capacity {
        usize::try_from(tier)
            .ok()
            .and_then(|index| self.default_capacity_tiers.get(index))
            .copied()
            .unwrap_or(Capacity::Unlimited)
    }

    /// The raw policy document, if one is configured.
    ///
    /// A blank document is reported as `None`.
    pub fn policy_document(&self) -> Result<Option<String>, PolicyError> {
        let document = match (&self.policy, &self.policy_path) {
            (Some(policy), _) => policy.clone(),
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
                path: path.clone(),
                source,
            })?,
            (None, None) => return Ok(None),
        };

        if document.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(document))
        }
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (default). State is local to the process.
    #[default]
    Memory,
    /// Redis storage with configuration.
    Redis(Box<RedisConfig>),
}

/// Redis storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisConfig {
    /// Redis connection URL (redis:// or rediss:// for TLS).
    pub url: String,
    /// Connection pool configuration.
    #[serde(default)]
    pub pool: RedisPoolConfig,
    /// TLS configuration.
    pub tls: Option<RedisTlsConfig>,
    /// Key prefix for all bucket keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Response timeout for a single bucket check.
    #[serde(default = "default_response_timeout", deserialize_with = "deserialize_duration")]
    pub response_timeout: Duration,
    /// Run the bucket update as one atomic script instead of separate reads and writes.
    #[serde(default)]
    pub strict: bool,
    /// Expiry attached to bucket keys. Buckets never expire when unset.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub key_ttl: Option<Duration>,
}

fn default_key_prefix() -> String {
    "tollgate:rate_limit:".to_string()
}

fn default_response_timeout() -> Duration {
    Duration::from_secs(1)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/0".to_string(),
            pool: RedisPoolConfig::default(),
            tls: None,
            key_prefix: default_key_prefix(),
            response_timeout: default_response_timeout(),
            strict: false,
            key_ttl: None,
        }
    }
}

/// Redis connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisPoolConfig {
    /// Maximum number of connections.
    pub max_size: Option<usize>,
    /// Timeout for creating connections.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_create: Option<Duration>,
    /// Timeout for waiting for a connection.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_wait: Option<Duration>,
    /// Timeout before recycling idle connections.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub timeout_recycle: Option<Duration>,
}

impl Default for RedisPoolConfig {
    fn default() -> Self {
        Self {
            max_size: Some(16),
            timeout_create: Some(Duration::from_secs(1)),
            timeout_wait: Some(Duration::from_secs(1)),
            timeout_recycle: Some(Duration::from_secs(300)),
        }
    }
}

/// Redis TLS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisTlsConfig {
    /// Allow insecure connections (skip certificate validation).
    pub insecure: Option<bool>,
    /// Path to CA certificate file.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to client certificate file (for mutual TLS).
    pub client_cert_path: Option<PathBuf>,
    /// Path to client key file (for mutual TLS).
    pub client_key_path: Option<PathBuf>,
}
