//! E2E Error Scenario Tests
//!
//! Requests the server refuses, and the status each maps to:
//! - unsupported methods: 405
//! - malformed paths and missing parameters: 400
//! - sinks that cannot be opened: 456

use super::common::E2ETestEnv;

/// Test: methods other than GET and POST are rejected with 405
#[tokio::test]
async fn test_unsupported_methods() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let put = env
        .client
        .put(format!("{}/upload-1", env.base_url()))
        .body("data")
        .send()
        .await
        .unwrap();
    assert_eq!(put.status(), 405);
    assert_eq!(put.headers().get("content-type").unwrap(), "text/plain");

    let delete = env
        .client
        .delete(format!("{}/upload-1", env.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(delete.status(), 405);

    assert!(!env.output_path("upload-1").exists());
    assert!(env.registry.is_empty());
}

/// Test: a GET to anything but /close is a bad request
#[tokio::test]
async fn test_get_other_path() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let response = env
        .client
        .get(format!("{}/other", env.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}

/// Test: POST to the root path has no name to write to
#[tokio::test]
async fn test_post_without_name() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let response = env
        .client
        .post(format!("{}/", env.base_url()))
        .body("data")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(std::fs::read_dir(env.output_dir()).unwrap().next().is_none());
}

/// Test: /close without a fileName parameter is a bad request
#[tokio::test]
async fn test_close_without_file_name() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let response = env
        .client
        .get(format!("{}/close", env.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = env
        .client
        .get(format!("{}/close?other=1", env.base_url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

/// Test: a sink that cannot be opened yields 456 and frees the name
#[tokio::test]
async fn test_unwritable_output_dir() {
    let env = E2ETestEnv::with(|config| {
        config.storage.output_dir = std::env::temp_dir()
            .join("ingest-dump-missing")
            .join("does-not-exist");
    })
    .await
    .expect("Failed to create test env");

    let response = env.post("lost", "data").await.unwrap();
    assert_eq!(response.status(), 456);
    assert_eq!(response.headers().get("content-type").unwrap(), "text/plain");
    assert!(!response.text().await.unwrap().is_empty());
    assert!(env.registry.is_empty(), "failed open must not leak a session");
}

/// Test: names that would escape the output directory are rejected
#[tokio::test]
async fn test_dot_dot_name_rejected() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let response = env.post("%2E%2E", "data").await.unwrap();
    assert_eq!(response.status(), 400);
    assert!(env.registry.is_empty());
}
