//! E2E Cancellation and Conflict Tests
//!
//! ## Test Coverage
//!
//! - `GET /close` terminates an in-flight upload and its connection
//! - the name is free again right after the close returns
//! - closing twice, or closing an unknown name, yields 404
//! - a second upload under an active name yields 409 and leaves the first alone

use super::common::{BodyChunk, E2ETestEnv};
use bytes::Bytes;
use futures::SinkExt;
use std::time::Duration;

const MB: usize = 1024 * 1024;

/// Test: close a 5MB upload midway through the transfer
#[tokio::test]
async fn test_close_mid_transfer() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");
    let payload = E2ETestEnv::random_payload(5 * MB);

    let (mut tx, request) = env.post_streaming("upload-2");

    // Send the first two megabytes, keep the rest back
    for chunk in payload[..2 * MB].chunks(256 * 1024) {
        tx.send(Ok(Bytes::copy_from_slice(chunk))).await.unwrap();
    }
    assert!(env.wait_for_session("upload-2", true).await);

    let response = env.close("upload-2").await.expect("close request failed");
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "");
    assert!(!env.registry.contains("upload-2"));

    // The pending POST resolves even though its body never finished
    let outcome = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .expect("POST should not hang after close");
    match outcome.expect("client task panicked") {
        Err(e) => assert!(!e.is_status(), "expected a transport error, got {}", e),
        Ok(response) => panic!(
            "cancelled upload must not get a response, got {}",
            response.status()
        ),
    }
    drop(tx);

    // Whatever arrived before the close was flushed; nothing more
    let written = std::fs::metadata(env.output_path("upload-2")).unwrap().len();
    assert!(written <= 2 * MB as u64);

    // The name can be reused immediately
    let retry = env.post("upload-2", "second attempt").await.unwrap();
    assert_eq!(retry.status(), 200);
    assert_eq!(retry.text().await.unwrap(), "OK");
    assert_eq!(
        std::fs::read(env.output_path("upload-2")).unwrap(),
        b"second attempt"
    );
}

/// Test: closing the same upload twice yields 404 the second time
#[tokio::test]
async fn test_close_twice() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");
    let (mut tx, request) = env.post_streaming("twice");

    tx.send(Ok(Bytes::from_static(b"some data"))).await.unwrap();
    assert!(env.wait_for_session("twice", true).await);

    let first = env.close("twice").await.unwrap();
    assert_eq!(first.status(), 200);

    let second = env.close("twice").await.unwrap();
    assert_eq!(second.status(), 404);
    assert!(second.text().await.unwrap().contains("twice"));

    let outcome = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .expect("POST should not hang after close");
    assert!(
        matches!(outcome, Ok(Err(_))),
        "closed upload must end without a response"
    );
}

/// Test: closing an unknown name yields 404 with the name echoed
#[tokio::test]
async fn test_close_unknown_name() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let response = env.close("never-started").await.unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain"
    );
    assert!(response.text().await.unwrap().contains("never-started"));
    assert!(env.registry.is_empty());
}

/// Test: a second upload under an active name is rejected with 409
#[tokio::test]
async fn test_duplicate_name_conflict() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");
    let (mut tx, first) = env.post_streaming("dup");

    tx.send(Ok(Bytes::from_static(b"first-"))).await.unwrap();
    assert!(env.wait_for_session("dup", true).await);

    let second = env.post("dup", "intruder").await.unwrap();
    assert_eq!(second.status(), 409);
    assert!(second.text().await.unwrap().contains("dup"));

    // The first upload carries on untouched
    assert!(env.registry.contains("dup"));
    let chunk: BodyChunk = Ok(Bytes::from_static(b"upload"));
    tx.send(chunk).await.unwrap();
    drop(tx);

    let response = first.await.unwrap().expect("first upload failed");
    assert_eq!(response.status(), 200);
    assert_eq!(std::fs::read(env.output_path("dup")).unwrap(), b"first-upload");
    assert!(env.registry.is_empty());
}

/// Test: closing one upload leaves the others running
#[tokio::test]
async fn test_close_is_scoped_to_one_session() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");
    let (mut keep_tx, keep) = env.post_streaming("keep");
    let (mut stop_tx, stop) = env.post_streaming("stop");

    keep_tx.send(Ok(Bytes::from_static(b"k1"))).await.unwrap();
    stop_tx.send(Ok(Bytes::from_static(b"s1"))).await.unwrap();
    assert!(env.wait_for_session("keep", true).await);
    assert!(env.wait_for_session("stop", true).await);

    assert_eq!(env.close("stop").await.unwrap().status(), 200);
    let _ = tokio::time::timeout(Duration::from_secs(5), stop)
        .await
        .expect("closed POST should resolve");
    drop(stop_tx);

    assert!(env.registry.contains("keep"));
    keep_tx.send(Ok(Bytes::from_static(b"k2"))).await.unwrap();
    drop(keep_tx);

    let response = keep.await.unwrap().unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(std::fs::read(env.output_path("keep")).unwrap(), b"k1k2");
}

/// Test: a client that vanishes mid-upload does not leak its session
#[tokio::test]
async fn test_client_disconnect_releases_name() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");
    let (mut tx, request) = env.post_streaming("vanish");

    tx.send(Ok(Bytes::from_static(b"partial"))).await.unwrap();
    assert!(env.wait_for_session("vanish", true).await);

    // Aborting the client task drops its connection
    request.abort();
    drop(tx);

    assert!(
        env.wait_for_session("vanish", false).await,
        "session should be cleaned up after disconnect"
    );
    let retry = env.post("vanish", "again").await.unwrap();
    assert_eq!(retry.status(), 200);
}
