//! HTTP server module
//!
//! Accepts connections, serves them with hyper's HTTP/1 implementation and
//! hands every request to the [`Dispatcher`].
//!
//! Each connection gets a [`TransportHandle`]. The connection task races the
//! hyper connection future against that handle, so a cancelled upload can
//! drop its client connection without reaching into hyper internals.
//!
//! # Example
//!
//! ```no_run
//! use ingest_dump::{config::Config, server::IngestServer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = Config::default();
//! config.server.address = "127.0.0.1:0".to_string();
//!
//! let server = IngestServer::new(config).await?;
//! println!("Listening on {}", server.local_addr());
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod dispatch;

pub use dispatch::Dispatcher;

use crate::config::Config;
use crate::session::{SessionRegistry, TransportHandle};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),
}

/// The ingest HTTP server
pub struct IngestServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
}

impl IngestServer {
    /// Bind the configured address with a fresh registry.
    ///
    /// Port 0 lets the OS pick a port; see [`local_addr`](Self::local_addr).
    pub async fn new(config: Config) -> Result<Self, ServerError> {
        Self::with_registry(config, SessionRegistry::new()).await
    }

    /// Bind the configured address, sharing `registry` with the caller
    pub async fn with_registry(
        config: Config,
        registry: SessionRegistry,
    ) -> Result<Self, ServerError> {
        let addr = config
            .server
            .socket_addr()
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!(
            "Server bound to {} (storage {})",
            local_addr,
            if config.storage.enabled {
                "enabled"
            } else {
                "disabled"
            }
        );

        Ok(Self {
            listener,
            local_addr,
            dispatcher: Arc::new(Dispatcher::from_config(&config, registry)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &SessionRegistry {
        self.dispatcher.registry()
    }

    /// Serve until the process is stopped
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves.
    ///
    /// Accept errors are logged and do not stop the loop.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        info!("Server running at http://{}", self.local_addr);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down server");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let dispatcher = Arc::clone(&self.dispatcher);
            tokio::spawn(serve_connection(stream, peer_addr, dispatcher));
        }
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
) {
    let transport = TransportHandle::new();
    let io = TokioIo::new(stream);

    let service_transport = transport.clone();
    let service = service_fn(move |req| {
        let dispatcher = Arc::clone(&dispatcher);
        let transport = service_transport.clone();
        async move { Ok::<_, Infallible>(dispatcher.handle(req, transport, peer_addr).await) }
    });

    let connection = http1::Builder::new().serve_connection(io, service);

    // An abort wins over a response hyper could still write
    tokio::select! {
        biased;
        // Dropping the connection future closes the socket
        _ = transport.aborted() => {
            info!("Connection from {} closed by cancel request", peer_addr);
        }
        result = connection => {
            if let Err(e) = result {
                debug!("Error serving connection from {}: {}", peer_addr, e);
            }
        }
    }
}
