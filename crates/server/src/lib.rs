//! Tollgate server library.
//!
//! Provides a reusable server function to serve Tollgate either for the binary, or for the integration tests.

#![deny(missing_docs)]

mod health;
mod rate_limit;

use std::{net::SocketAddr, sync::Arc};

use ::rate_limit::RateLimitManager;
use anyhow::anyhow;
use axum::{
    Router,
    routing::{get, post},
};
use config::Config;
use tokio::net::TcpListener;

/// Path of the rate limit check endpoint.
pub const CHECK_PATH: &str = "/rate-limit/check";

/// Path of the policy reload endpoint.
pub const RELOAD_PATH: &str = "/rate-limit/reload";

/// Configuration for serving Tollgate.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized Tollgate TOML configuration.
    pub config: Config,
}

/// Starts and runs the Tollgate server with the provided configuration.
pub async fn serve(ServeConfig { listen_address, config }: ServeConfig) -> anyhow::Result<()> {
    if config.rate_limits.enabled {
        log::debug!("Initializing rate limit manager with configured limits");
    } else {
        log::warn!("Rate limiting is disabled, every check will be allowed");
    }

    let manager = RateLimitManager::new(config.rate_limits.clone())
        .await
        .map_err(|e| anyhow!("Failed to initialize rate limiting: {e}"))?;

    let mut app = router(Arc::new(manager));

    if config.server.health.enabled {
        if let Some(listen) = config.server.health.listen {
            let health_config = config.server.health.clone();

            tokio::spawn(async move {
                if let Err(e) = health::bind_health_endpoint(listen, health_config).await {
                    log::error!("{e}");
                }
            });
        } else {
            app = app.route(&config.server.health.path, get(health::health));
        }
    }

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    log::info!("Rate limit endpoint available at: http://{listen_address}{CHECK_PATH}");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;

    Ok(())
}

/// The rate limit routes, without the health endpoint.
fn router(manager: Arc<RateLimitManager>) -> Router {
    Router::new()
        .route(CHECK_PATH, post(rate_limit::check))
        .route(RELOAD_PATH, post(rate_limit::reload))
        .with_state(manager)
}
