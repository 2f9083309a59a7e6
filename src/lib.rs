//! Ingest Dump Library
//!
//! Minimal HTTP ingestion server: every `POST /<name>` streams its body into
//! a sink called `<name>`, and `GET /close?fileName=<name>` terminates an
//! upload that is still in flight.
//!
//! # Features
//!
//! - **Streaming**: bodies are written chunk by chunk, never buffered whole
//! - **Progress**: bytes and longest stall are sampled every second per upload
//! - **Cancellation**: any in-flight upload can be closed by name
//! - **Exactly-once cleanup**: sink close and deregistration happen once per
//!   upload, on every exit path
//!
//! # Example
//!
//! ```no_run
//! use ingest_dump::{config::Config, server::IngestServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let server = IngestServer::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod metrics;
pub mod progress;
pub mod router;
pub mod server;
pub mod session;
pub mod sink;

// Re-export commonly used types
pub use config::Config;
pub use server::IngestServer;
pub use session::{SessionError, SessionRegistry, UploadSession};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
