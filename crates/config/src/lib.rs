//! Tollgate configuration structures to map the tollgate.toml configuration.

#![deny(missing_docs)]

mod capacity;
mod health;
mod loader;
mod policy;
mod rate_limit;

use std::{net::SocketAddr, path::Path};

pub use capacity::Capacity;
pub use health::HealthConfig;
pub use policy::{PolicyDocument, PolicyError, RateLimitAction, RateLimitRule};
pub use rate_limit::*;
use serde::Deserialize;

/// Main configuration structure for the Tollgate application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates the rate limit settings, including the policy document if one is configured.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate_rate_limits(&self.rate_limits)
    }
}

/// HTTP server configuration settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// Health endpoint configuration.
    #[serde(default)]
    pub health: HealthConfig,
}
