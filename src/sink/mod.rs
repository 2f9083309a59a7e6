//! Write sinks
//!
//! A sink is the append-only destination an upload session writes into.
//! Two implementations ship with the server:
//!
//! - [`FileSink`]: truncate-creates a file named after the session and writes
//!   the raw byte stream verbatim
//! - [`DiscardSink`]: accepts and drops everything (persistence disabled)
//!
//! [`SinkFactory`] picks one of them from the storage configuration.

use crate::config::StorageConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to open sink {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("Close failed: {0}")]
    Close(#[source] std::io::Error),

    #[error("Sink already closed")]
    Closed,
}

/// Append-only write destination
#[async_trait]
pub trait WriteSink: Send + Sync {
    /// Append a chunk; chunks land in call order
    async fn write(&mut self, chunk: &[u8]) -> Result<(), SinkError>;

    /// Flush and release the destination. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), SinkError>;
}

/// File-backed sink
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
    bytes_written: u64,
}

impl FileSink {
    /// Create (or truncate) the file at `path`
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let file = File::create(&path).await.map_err(|source| SinkError::Open {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            file: Some(file),
            bytes_written: 0,
        })
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes accepted so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

#[async_trait]
impl WriteSink for FileSink {
    async fn write(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        let file = self.file.as_mut().ok_or(SinkError::Closed)?;
        file.write_all(chunk).await.map_err(SinkError::Write)?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        file.flush().await.map_err(SinkError::Close)?;
        file.sync_all().await.map_err(SinkError::Close)?;
        Ok(())
    }
}

/// Sink that drops every byte
#[derive(Debug, Default)]
pub struct DiscardSink {
    closed: bool,
}

impl DiscardSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WriteSink for DiscardSink {
    async fn write(&mut self, _chunk: &[u8]) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.closed = true;
        Ok(())
    }
}

/// Builds the sink for a session according to the storage configuration
#[derive(Debug, Clone)]
pub struct SinkFactory {
    config: StorageConfig,
}

impl SinkFactory {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    /// Whether uploads are persisted at all
    pub fn persists(&self) -> bool {
        self.config.enabled
    }

    /// Destination path for a session name
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.config.output_dir.join(name)
    }

    /// Open the sink for `name`
    pub async fn open(&self, name: &str) -> Result<Box<dyn WriteSink>, SinkError> {
        if !self.config.enabled {
            return Ok(Box::new(DiscardSink::new()));
        }

        let sink = FileSink::create(self.path_for(name)).await?;
        Ok(Box::new(sink))
    }
}
