//! Common E2E Test Infrastructure
//!
//! Provides shared utilities for E2E tests:
//! - Test server management
//! - Streaming request bodies fed from the test
//! - Test data generation

use bytes::Bytes;
use futures::channel::mpsc;
use ingest_dump::config::Config;
use ingest_dump::server::IngestServer;
use ingest_dump::session::SessionRegistry;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Chunk type fed into streaming request bodies
pub type BodyChunk = Result<Bytes, std::io::Error>;

/// E2E Test Environment
///
/// Owns a running server, its registry and the directory uploads land in.
pub struct E2ETestEnv {
    pub server_addr: SocketAddr,
    pub registry: SessionRegistry,
    pub client: reqwest::Client,
    output_dir: TempDir,
    _server_handle: tokio::task::JoinHandle<()>,
}

impl E2ETestEnv {
    /// Create a test environment that persists uploads
    pub async fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Self::with(|_| {}).await
    }

    /// Create a test environment with persistence disabled
    pub async fn without_storage() -> Result<Self, Box<dyn std::error::Error>> {
        Self::with(|config| config.storage.enabled = false).await
    }

    /// Create a test environment after adjusting the default test config
    pub async fn with(
        adjust: impl FnOnce(&mut Config),
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let output_dir = tempfile::tempdir()?;

        let mut config = Config::default();
        config.server.address = "127.0.0.1:0".to_string();
        config.storage.output_dir = output_dir.path().to_path_buf();
        config.progress.sample_interval_ms = 100;
        adjust(&mut config);

        let registry = SessionRegistry::new();
        let server = IngestServer::with_registry(config, registry.clone()).await?;
        let server_addr = server.local_addr();

        let server_handle = tokio::spawn(async move {
            let _ = server.run().await;
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            server_addr,
            registry,
            client,
            output_dir,
            _server_handle: server_handle,
        })
    }

    /// Get the base URL for the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.server_addr)
    }

    pub fn output_dir(&self) -> &Path {
        self.output_dir.path()
    }

    /// Path the server writes `name` to
    pub fn output_path(&self, name: &str) -> PathBuf {
        self.output_dir.path().join(name)
    }

    /// POST a complete body to `/<name>`
    pub async fn post(
        &self,
        name: &str,
        body: impl Into<reqwest::Body>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        self.client
            .post(format!("{}/{}", self.base_url(), name))
            .body(body)
            .send()
            .await
    }

    /// Start a POST whose body is fed through the returned sender.
    ///
    /// The request completes once the sender is dropped (or the server gives
    /// up on the connection).
    pub fn post_streaming(
        &self,
        name: &str,
    ) -> (
        mpsc::Sender<BodyChunk>,
        tokio::task::JoinHandle<Result<reqwest::Response, reqwest::Error>>,
    ) {
        let (tx, rx) = mpsc::channel::<BodyChunk>(4);
        let request = self
            .client
            .post(format!("{}/{}", self.base_url(), name))
            .header("Content-Type", "application/octet-stream")
            .body(reqwest::Body::wrap_stream(rx));

        (tx, tokio::spawn(request.send()))
    }

    /// `GET /close?fileName=<name>`
    pub async fn close(&self, name: &str) -> Result<reqwest::Response, reqwest::Error> {
        self.client
            .get(format!("{}/close?fileName={}", self.base_url(), name))
            .send()
            .await
    }

    /// Wait until `name` shows up in (or disappears from) the registry
    pub async fn wait_for_session(&self, name: &str, present: bool) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            if self.registry.contains(name) == present {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Generate a random test payload
    pub fn random_payload(size: usize) -> Bytes {
        use rand::Rng;
        let mut rng = rand::rng();
        let data: Vec<u8> = (0..size).map(|_| rng.random()).collect();
        Bytes::from(data)
    }
}
