#![allow(clippy::panic)]

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use config::Config;
use serde_json::json;
use server::ServeConfig;
use tokio::net::{TcpListener, TcpStream};

/// Test client for making HTTP requests to the test server
#[derive(Clone)]
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
}

impl TestClient {
    /// Create a new test client for the given base URL
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Send a POST request to the given path with JSON body
    pub async fn post<T: serde::Serialize>(&self, path: &str, body: &T) -> reqwest::Result<reqwest::Response> {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
    }

    /// Send a GET request to the given path
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .unwrap()
    }

    /// Ask whether `identity` may perform `action`, consuming a token.
    pub async fn check(&self, identity: &str, tier: u32, action: Option<&str>) -> CheckOutcome {
        let mut body = json!({ "identity": identity, "tier": tier });

        if let Some(action) = action {
            body["action"] = json!(action);
        }

        let response = self.post(server::CHECK_PATH, &body).await.unwrap();
        let status = response.status().as_u16();

        let retry_after = response
            .headers()
            .get("retry-after")
            .map(|value| value.to_str().unwrap().parse().unwrap());

        let body = response.json().await.unwrap();

        CheckOutcome {
            status,
            retry_after,
            body,
        }
    }

    /// Reload the rate limit policy.
    pub async fn reload(&self) -> (u16, serde_json::Value) {
        let response = self.post(server::RELOAD_PATH, &json!({})).await.unwrap();
        let status = response.status().as_u16();

        (status, response.json().await.unwrap())
    }
}

/// The answer to a rate limit check.
#[derive(Debug)]
pub struct CheckOutcome {
    pub status: u16,
    pub retry_after: Option<u64>,
    pub body: serde_json::Value,
}

impl CheckOutcome {
    pub fn allowed(&self) -> bool {
        self.status == 200
    }
}

/// Test server that manages the lifecycle of a server instance
pub struct TestServer {
    pub client: TestClient,
    pub address: SocketAddr,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub fn builder() -> TestServerBuilder {
        TestServerBuilder { health_listen: None }
    }
}

pub struct TestServerBuilder {
    health_listen: Option<SocketAddr>,
}

impl TestServerBuilder {
    /// Serve the health endpoint on its own address.
    pub fn health_listen(mut self, address: SocketAddr) -> Self {
        self.health_listen = Some(address);
        self
    }

    /// Start a new test server with the given TOML configuration
    pub async fn build(self, config_toml: &str) -> TestServer {
        let mut config: Config = toml::from_str(config_toml).unwrap();
        config.validate().unwrap();

        if let Some(address) = self.health_listen {
            config.server.health.listen = Some(address);
        }

        // Find an available port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let serve_config = ServeConfig {
            listen_address: address,
            config,
        };

        let (tx, mut rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            // Drop the listener so the server can bind to the address
            drop(listener);

            if let Err(e) = server::serve(serve_config).await {
                let _ = tx.send(e);
            }
        });

        wait_for_listener(address).await;

        if let Ok(e) = rx.try_recv() {
            panic!("Server failed to start: {e}");
        }

        TestServer {
            client: TestClient::new(format!("http://{address}")),
            address,
            _handle: handle,
        }
    }
}

/// Wait until something accepts connections on `address`.
pub async fn wait_for_listener(address: SocketAddr) {
    for _ in 0..100 {
        if TcpStream::connect(address).await.is_ok() {
            return;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    panic!("Nothing is listening on {address}");
}

/// Buckets refill at minute boundaries. Tests that drain a bucket call this first so the
/// boundary does not fall in the middle of the test.
pub async fn wait_for_fresh_minute() {
    let into_minute = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() % 60_000;

    if into_minute > 50_000 {
        let remaining = (60_000 - into_minute) as u64;
        tokio::time::sleep(Duration::from_millis(remaining + 100)).await;
    }
}

/// A key prefix no other test run shares.
pub fn unique_prefix(name: &str) -> String {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    format!("tollgate_test_{name}_{nanos}:")
}

/// URL of the Redis server for tests. `TOLLGATE_TEST_REDIS_URL` wins; otherwise a server on
/// localhost:6379 is used when one accepts connections, and `None` skips the test.
pub async fn test_redis_url() -> Option<String> {
    if let Ok(url) = std::env::var("TOLLGATE_TEST_REDIS_URL") {
        return Some(url);
    }

    if TcpStream::connect("127.0.0.1:6379").await.is_ok() {
        return Some("redis://localhost:6379/0".to_string());
    }

    eprintln!("skipping: no Redis on localhost:6379; set TOLLGATE_TEST_REDIS_URL to require one");

    None
}

/// A free local address for a second listener.
pub async fn free_address() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
