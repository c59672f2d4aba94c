//! Redis connection pool on top of deadpool.

use std::sync::atomic::{AtomicUsize, Ordering};

use config::{RedisConfig, RedisTlsConfig};
use deadpool::managed::{self, Metrics};
use redis::{Client, RedisError, RedisResult, aio::MultiplexedConnection};

/// Redis connection pool.
pub type Pool = managed::Pool<Manager>;

/// Manager for Redis connections.
#[derive(Debug)]
pub struct Manager {
    client: Client,
    ping_number: AtomicUsize,
}

impl Manager {
    /// Create a new Redis pool manager. No connection is opened here.
    pub fn new(config: &RedisConfig) -> RedisResult<Self> {
        let client = match &config.tls {
            Some(tls_config) => {
                let url = tls_url(&config.url, tls_config);
                let tls_certs = build_tls_certificates(tls_config)?;

                Client::build_with_tls(url, tls_certs)?
            }
            None => Client::open(config.url.as_str())?,
        };

        Ok(Self {
            client,
            ping_number: AtomicUsize::new(0),
        })
    }
}

impl managed::Manager for Manager {
    type Type = MultiplexedConnection;
    type Error = RedisError;

    async fn create(&self) -> Result<MultiplexedConnection, Self::Error> {
        self.client.get_multiplexed_async_connection().await
    }

    async fn recycle(&self, conn: &mut MultiplexedConnection, _: &Metrics) -> managed::RecycleResult<Self::Error> {
        let ping_number = self.ping_number.fetch_add(1, Ordering::Relaxed).to_string();

        let (n,) = redis::Pipeline::with_capacity(2)
            .cmd("UNWATCH")
            .ignore()
            .cmd("PING")
            .arg(&ping_number)
            .query_async::<(String,)>(conn)
            .await?;

        if n == ping_number {
            Ok(())
        } else {
            Err(managed::RecycleError::message("Invalid PING response"))
        }
    }
}

/// Skipping certificate validation is expressed through the URL fragment in the redis client.
fn tls_url(url: &str, config: &RedisTlsConfig) -> String {
    if config.insecure.unwrap_or(false) && !url.contains('#') {
        format!("{url}#insecure")
    } else {
        url.to_string()
    }
}

fn read_file(path: &std::path::Path, what: &'static str) -> RedisResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| RedisError::from((redis::ErrorKind::IoError, what, format!("{}: {e}", path.display()))))
}

fn build_tls_certificates(config: &RedisTlsConfig) -> RedisResult<redis::TlsCertificates> {
    use redis::ClientTlsConfig;

    let client_tls = match (&config.client_cert_path, &config.client_key_path) {
        (Some(cert_path), Some(key_path)) => Some(ClientTlsConfig {
            client_cert: read_file(cert_path, "Failed to read client certificate")?,
            client_key: read_file(key_path, "Failed to read client key")?,
        }),
        _ => None,
    };

    let root_cert = match &config.ca_cert_path {
        Some(ca_path) => Some(read_file(ca_path, "Failed to read CA certificate")?),
        None => None,
    };

    Ok(redis::TlsCertificates { client_tls, root_cert })
}

/// Create a Redis connection pool from configuration.
pub fn create_pool(config: &RedisConfig) -> RedisResult<Pool> {
    let manager = Manager::new(config)?;

    let mut pool_config = managed::PoolConfig::default();

    if let Some(max_size) = config.pool.max_size {
        pool_config.max_size = max_size;
    }

    pool_config.timeouts.create = config.pool.timeout_create;
    pool_config.timeouts.wait = config.pool.timeout_wait;
    pool_config.timeouts.recycle = config.pool.timeout_recycle;

    Pool::builder(manager)
        .config(pool_config)
        .runtime(deadpool::Runtime::Tokio1)
        .build()
        .map_err(|e| RedisError::from((redis::ErrorKind::IoError, "Failed to create pool", e.to_string())))
}
