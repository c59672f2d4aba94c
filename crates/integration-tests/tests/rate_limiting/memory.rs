//! Rate limiting against the in-process bucket store.

use indoc::indoc;
use integration_tests::{TestServer, wait_for_fresh_minute};
use serde_json::json;

const CONFIG: &str = indoc! {r#"
    [rate_limits]
    enabled = true
    default_capacity_tiers = [3, 1000, "unlimited"]
    policy = '''
    {
      "rateLimits": [
        {
          "tier": 1,
          "actions": [
            { "name": "export", "limitPerHour": 2 },
            { "name": "delete", "limitPerHour": 0 }
          ]
        },
        {
          "tier": 3,
          "limitPerHour": 1,
          "actions": ["login", "signup"]
        }
      ]
    }
    '''
"#};

#[tokio::test]
async fn tier_default_is_enforced() {
    wait_for_fresh_minute().await;

    let server = TestServer::builder().build(CONFIG).await;

    let mut results = Vec::new();

    for i in 1..=5 {
        let outcome = server.client.check("alice", 0, None).await;

        results.push(json!({
            "request": i,
            "status": outcome.status,
            "has_retry_after": outcome.retry_after.is_some(),
            "body_allowed": outcome.body["allowed"],
        }));
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      {
        "request": 1,
        "status": 200,
        "has_retry_after": false,
        "body_allowed": true
      },
      {
        "request": 2,
        "status": 200,
        "has_retry_after": false,
        "body_allowed": true
      },
      {
        "request": 3,
        "status": 200,
        "has_retry_after": false,
        "body_allowed": true
      },
      {
        "request": 4,
        "status": 429,
        "has_retry_after": true,
        "body_allowed": false
      },
      {
        "request": 5,
        "status": 429,
        "has_retry_after": true,
        "body_allowed": false
      }
    ]
    "#);
}

#[tokio::test]
async fn retry_after_points_at_the_next_minute() {
    wait_for_fresh_minute().await;

    let server = TestServer::builder().build(CONFIG).await;

    for _ in 0..3 {
        assert!(server.client.check("bob", 0, None).await.allowed());
    }

    let outcome = server.client.check("bob", 0, None).await;
    assert_eq!(outcome.status, 429);

    let retry_after = outcome.retry_after.unwrap();
    assert!((1..=60).contains(&retry_after), "{retry_after}");
    assert_eq!(outcome.body["retryAfter"], json!(retry_after));
}

#[tokio::test]
async fn action_override_has_its_own_bucket() {
    wait_for_fresh_minute().await;

    let server = TestServer::builder().build(CONFIG).await;

    assert!(server.client.check("alice", 1, Some("export")).await.allowed());
    assert!(server.client.check("alice", 1, Some("export")).await.allowed());
    assert!(!server.client.check("alice", 1, Some("export")).await.allowed());

    // Other actions of the tier fall back to the tier default of 1000.
    assert!(server.client.check("alice", 1, Some("search")).await.allowed());
    assert!(server.client.check("alice", 1, None).await.allowed());

    // Another caller is not affected.
    assert!(server.client.check("bob", 1, Some("export")).await.allowed());
}

#[tokio::test]
async fn zero_capacity_always_rejects() {
    let server = TestServer::builder().build(CONFIG).await;

    let outcome = server.client.check("alice", 1, Some("delete")).await;

    assert_eq!(outcome.status, 429);
    assert_eq!(outcome.retry_after, None);

    insta::assert_json_snapshot!(outcome.body, @r#"
    {
      "allowed": false
    }
    "#);
}

#[tokio::test]
async fn unlimited_tier_never_rejects() {
    let server = TestServer::builder().build(CONFIG).await;

    for _ in 0..50 {
        assert!(server.client.check("alice", 2, Some("export")).await.allowed());
    }

    // Tiers beyond the table are unlimited as well.
    for _ in 0..50 {
        assert!(server.client.check("alice", 7, None).await.allowed());
    }
}

#[tokio::test]
async fn bare_actions_share_the_rule_limit() {
    wait_for_fresh_minute().await;

    let server = TestServer::builder().build(CONFIG).await;

    assert!(server.client.check("alice", 3, Some("login")).await.allowed());
    assert!(!server.client.check("alice", 3, Some("login")).await.allowed());

    assert!(server.client.check("alice", 3, Some("signup")).await.allowed());
    assert!(!server.client.check("alice", 3, Some("signup")).await.allowed());
}

#[tokio::test]
async fn disabled_rate_limits_allow_everything() {
    let config = indoc! {r#"
        [rate_limits]
        enabled = false
        default_capacity_tiers = [0]
    "#};

    let server = TestServer::builder().build(config).await;

    for _ in 0..10 {
        assert!(server.client.check("alice", 0, None).await.allowed());
    }
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let server = TestServer::builder().build(CONFIG).await;

    let response = server
        .client
        .post(server::CHECK_PATH, &json!({ "identity": "alice", "tier": -1 }))
        .await
        .unwrap();

    assert_eq!(response.status(), 422);

    let response = server
        .client
        .post(server::CHECK_PATH, &json!({ "tier": 0 }))
        .await
        .unwrap();

    assert_eq!(response.status(), 422);
}
