//! Policy reloads through the HTTP endpoint.

use indoc::{formatdoc, indoc};
use integration_tests::{TestServer, wait_for_fresh_minute};
use tempfile::NamedTempFile;

const INITIAL_POLICY: &str = indoc! {r#"
    {
      "rateLimits": [
        { "tier": 0, "actions": [{ "name": "export", "limitPerHour": 1 }] }
      ]
    }
"#};

const UPDATED_POLICY: &str = indoc! {r#"
    {
      "rateLimits": [
        { "tier": 0, "actions": [{ "name": "export", "limitPerHour": "unlimited" }] },
        { "tier": 1, "defaultLimitPerHour": 10, "actions": [{ "name": "export", "limitPerHour": 5 }] }
      ]
    }
"#};

fn config(policy: &NamedTempFile) -> String {
    formatdoc! {r#"
        [rate_limits]
        enabled = true
        default_capacity_tiers = [100]
        policy_path = "{}"
    "#, policy.path().display()}
}

#[tokio::test]
async fn reload_applies_file_changes() {
    wait_for_fresh_minute().await;

    let policy = NamedTempFile::new().unwrap();
    std::fs::write(policy.path(), INITIAL_POLICY).unwrap();

    let server = TestServer::builder().build(&config(&policy)).await;

    assert!(server.client.check("alice", 0, Some("export")).await.allowed());
    assert!(!server.client.check("alice", 0, Some("export")).await.allowed());

    std::fs::write(policy.path(), UPDATED_POLICY).unwrap();

    // The cached policy stays until a reload.
    assert!(!server.client.check("alice", 0, Some("export")).await.allowed());

    let (status, body) = server.client.reload().await;
    assert_eq!(status, 200);

    insta::assert_json_snapshot!(body, @r#"
    {
      "entries": 4
    }
    "#);

    for _ in 0..5 {
        assert!(server.client.check("alice", 0, Some("export")).await.allowed());
    }
}

#[tokio::test]
async fn failed_reload_keeps_the_current_policy() {
    wait_for_fresh_minute().await;

    let policy = NamedTempFile::new().unwrap();
    std::fs::write(policy.path(), INITIAL_POLICY).unwrap();

    let server = TestServer::builder().build(&config(&policy)).await;

    assert!(server.client.check("alice", 0, Some("export")).await.allowed());

    std::fs::write(policy.path(), r#"{ "rateLimits": [{ "tier": -1 }] }"#).unwrap();

    let (status, body) = server.client.reload().await;
    assert_eq!(status, 422);

    let error = body["error"].as_str().unwrap();
    assert!(error.starts_with("unable to parse rate limit policy"), "{error}");

    assert!(!server.client.check("alice", 0, Some("export")).await.allowed());
}
