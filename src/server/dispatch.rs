//! Request dispatcher
//!
//! Turns routed HTTP requests into registry and session calls and maps the
//! resulting errors back to plain-text HTTP responses.

use crate::config::Config;
use crate::metrics;
use crate::router::{extension_for, RequestRouter, Route};
use crate::session::{
    SessionError, SessionOptions, SessionOutcome, SessionRegistry, TransportHandle,
    UploadSession, MAX_STATUS, UNRECOVERABLE_STATUS,
};
use crate::sink::SinkFactory;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, ORIGIN};
use hyper::{body::Incoming, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Routes requests to upload sessions
#[derive(Clone)]
pub struct Dispatcher {
    registry: SessionRegistry,
    sinks: SinkFactory,
    options: SessionOptions,
}

impl Dispatcher {
    pub fn new(registry: SessionRegistry, sinks: SinkFactory, options: SessionOptions) -> Self {
        Self {
            registry,
            sinks,
            options,
        }
    }

    /// Dispatcher for `config` sharing `registry`
    pub fn from_config(config: &Config, registry: SessionRegistry) -> Self {
        Self::new(
            registry,
            SinkFactory::new(config.storage.clone()),
            SessionOptions {
                sample_interval: Duration::from_millis(config.progress.sample_interval_ms),
            },
        )
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Handle one request. `transport` is the abort handle of the connection
    /// the request arrived on.
    pub async fn handle(
        &self,
        req: Request<Incoming>,
        transport: TransportHandle,
        peer: SocketAddr,
    ) -> Response<Full<Bytes>> {
        let origin = req
            .headers()
            .get(ORIGIN)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("*"));

        info!("{} http://{}{}", req.method(), peer, req.uri());

        let route = RequestRouter::parse(req.method().as_str(), req.uri().path(), req.uri().query());
        let result = match route {
            Ok(Route::Upload { name }) => self.upload(name, req, transport).await,
            Ok(Route::Close { name }) => self.close(&name).await,
            Err(e) => Err(e.into()),
        };

        let mut response = result.unwrap_or_else(|e| error_response(&e));
        response
            .headers_mut()
            .insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        response
    }

    async fn upload(
        &self,
        name: String,
        req: Request<Incoming>,
        transport: TransportHandle,
    ) -> Result<Response<Full<Bytes>>, SessionError> {
        if let Some(content_type) = req.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
            match extension_for(content_type) {
                Some(ext) => debug!(session = %name, content_type, ext, "Extension hint"),
                None => debug!(session = %name, content_type, "No extension known for content type"),
            }
        }

        // A conflicting request is rejected here, before its body is read
        let reservation = self.registry.reserve(&name)?;
        let sink = self.sinks.open(&name).await?;
        let session = UploadSession::start(reservation, sink, self.options, Some(transport))?;

        let body = Box::pin(req.into_body().into_data_stream());

        // The session runs as its own task so that cleanup completes even if
        // the connection (and with it this future) is dropped.
        match tokio::spawn(session.run(body)).await {
            Ok(SessionOutcome::Completed(_)) => Ok(plain_text(StatusCode::OK, "OK")),
            Ok(SessionOutcome::Disconnected { .. }) => Ok(plain_text(StatusCode::OK, "OK")),
            Ok(SessionOutcome::Failed { error, .. }) => Err(error),
            // The connection task drops this future together with the socket
            Ok(SessionOutcome::Cancelled(_)) => std::future::pending().await,
            Err(e) => Err(SessionError::Internal(format!("Upload task failed: {}", e))),
        }
    }

    async fn close(&self, name: &str) -> Result<Response<Full<Bytes>>, SessionError> {
        self.registry.cancel(name).await?;
        info!(session = %name, "Upload closed on request");
        Ok(plain_text(StatusCode::OK, ""))
    }
}

/// Status for `err`: the error's own code, clamped, falling back to 456
pub fn status_for(err: &SessionError) -> StatusCode {
    let code = err.status_code().min(MAX_STATUS);
    StatusCode::from_u16(code).unwrap_or_else(|_| unrecoverable_status())
}

fn unrecoverable_status() -> StatusCode {
    StatusCode::from_u16(UNRECOVERABLE_STATUS).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn error_response(err: &SessionError) -> Response<Full<Bytes>> {
    let status = status_for(err);
    if status.as_u16() < MAX_STATUS && status.as_u16() != UNRECOVERABLE_STATUS {
        warn!(kind = err.kind(), status = status.as_u16(), "{}", err);
    } else {
        error!(kind = err.kind(), status = status.as_u16(), error = ?err, "{}", err);
    }
    metrics::record_error(err.kind());
    plain_text(status, &err.to_string())
}

fn plain_text(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
