//! Rate limiting against Redis. Tests run against `TOLLGATE_TEST_REDIS_URL`, or a server on
//! localhost:6379 when one is up.

use indoc::formatdoc;
use integration_tests::{TestServer, test_redis_url, unique_prefix, wait_for_fresh_minute};
use tokio::task::JoinSet;

fn config(url: &str, prefix: &str, strict: bool) -> String {
    formatdoc! {r#"
        [rate_limits]
        enabled = true
        default_capacity_tiers = [5, 2]

        [rate_limits.storage]
        type = "redis"
        url = "{url}"
        key_prefix = "{prefix}"
        strict = {strict}
        key_ttl = "2h"
    "#}
}

#[tokio::test]
async fn basic_redis_rate_limiting() {
    let Some(url) = test_redis_url().await else {
        return;
    };

    wait_for_fresh_minute().await;

    let server = TestServer::builder()
        .build(&config(&url, &unique_prefix("basic"), false))
        .await;

    let mut allowed = 0;

    for _ in 0..7 {
        if server.client.check("alice", 0, None).await.allowed() {
            allowed += 1;
        }
    }

    assert_eq!(allowed, 5);
}

#[tokio::test]
async fn strict_mode_is_exact_under_concurrency() {
    let Some(url) = test_redis_url().await else {
        return;
    };

    wait_for_fresh_minute().await;

    let server = TestServer::builder()
        .build(&config(&url, &unique_prefix("strict"), true))
        .await;

    let mut checks = JoinSet::new();

    for _ in 0..20 {
        let client = server.client.clone();
        checks.spawn(async move { client.check("alice", 0, None).await.allowed() });
    }

    let allowed = checks.join_all().await.into_iter().filter(|allowed| *allowed).count();
    assert_eq!(allowed, 5);
}

#[tokio::test]
async fn buckets_are_shared_between_instances() {
    let Some(url) = test_redis_url().await else {
        return;
    };

    wait_for_fresh_minute().await;

    let config = config(&url, &unique_prefix("shared"), true);

    let first = TestServer::builder().build(&config).await;
    let second = TestServer::builder().build(&config).await;

    assert!(first.client.check("alice", 1, None).await.allowed());
    assert!(second.client.check("alice", 1, None).await.allowed());
    assert!(!first.client.check("alice", 1, None).await.allowed());
    assert!(!second.client.check("alice", 1, None).await.allowed());
}

#[tokio::test]
async fn unreachable_redis_fails_open() {
    let config = formatdoc! {r#"
        [rate_limits]
        enabled = true
        default_capacity_tiers = [1]

        [rate_limits.storage]
        type = "redis"
        url = "redis://127.0.0.1:1/0"
        response_timeout = "200ms"

        [rate_limits.storage.pool]
        timeout_create = "200ms"
        timeout_wait = "200ms"
    "#};

    let server = TestServer::builder().build(&config).await;

    for _ in 0..3 {
        let outcome = server.client.check("alice", 0, None).await;
        assert_eq!(outcome.status, 200);
    }
}
