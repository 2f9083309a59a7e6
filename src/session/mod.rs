//! Upload session lifecycle
//!
//! An [`UploadSession`] binds one request body stream to one [`WriteSink`]
//! and one [`ProgressTracker`]. It runs as the single owner of that state:
//! data chunks, end-of-stream, transport errors and cancel requests are all
//! handled inside [`UploadSession::run`], and every way out goes through the
//! same cleanup (`finish`).
//!
//! # States
//!
//! ```text
//! Active ──► Completing ──► Closed
//!   │            └────────► Cancelled
//!   └─────────────────────► Closed   (transport or sink failure)
//! ```
//!
//! The only cross-task entry point is [`SessionRegistry::cancel`], which
//! claims the session under its control lock and hands the owner a request
//! to acknowledge once cleanup is done. Whoever claims first (cancel or
//! end-of-stream) decides the terminal state; the other side becomes a no-op.

pub mod registry;
pub mod transport;

pub use registry::{Reservation, SessionRegistry};
pub use transport::TransportHandle;

use crate::metrics;
use crate::progress::{FinalReport, HumanBytes, ProgressTracker, Sampler, SharedTracker};
use crate::sink::{SinkError, WriteSink};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Highest status code ever sent back to a client
pub const MAX_STATUS: u16 = 520;

/// Status used for errors that have no better mapping
pub const UNRECOVERABLE_STATUS: u16 = 456;

/// Errors surfaced by sessions and the registry
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),

    #[error("Publication name '{0}' is already in use")]
    Conflict(String),

    #[error("No upload in progress named '{0}'")]
    NotFound(String),

    #[error("Method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("Storage failure: {0}")]
    Sink(#[from] SinkError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Internal(String),
}

impl SessionError {
    /// HTTP status for this error, clamped to [`MAX_STATUS`]
    pub fn status_code(&self) -> u16 {
        let code = match self {
            SessionError::Validation(_) => 400,
            SessionError::NotFound(_) => 404,
            SessionError::MethodNotAllowed(_) => 405,
            SessionError::Conflict(_) => 409,
            SessionError::Sink(_) | SessionError::Transport(_) | SessionError::Internal(_) => {
                UNRECOVERABLE_STATUS
            }
        };
        code.min(MAX_STATUS)
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Validation(_) => "validation",
            SessionError::Conflict(_) => "conflict",
            SessionError::NotFound(_) => "not_found",
            SessionError::MethodNotAllowed(_) => "method_not_allowed",
            SessionError::Sink(_) => "sink",
            SessionError::Transport(_) => "transport",
            SessionError::Internal(_) => "internal",
        }
    }
}

/// Reject names that are empty or would escape the output directory
pub fn validate_name(name: &str) -> Result<(), SessionError> {
    if name.is_empty() {
        return Err(SessionError::Validation(
            "Publication name is missing (cannot be empty)".into(),
        ));
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(SessionError::Validation(format!(
            "Publication name '{}' is not a valid file name",
            name
        )));
    }
    Ok(())
}

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Completing,
    Closed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Cancelled)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Active => "active",
            SessionState::Completing => "completing",
            SessionState::Closed => "closed",
            SessionState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Sent by a canceller; the owner replies once cleanup has finished
pub(crate) type CancelRequest = oneshot::Sender<()>;

struct Control {
    state: SessionState,
    cancel_tx: Option<oneshot::Sender<CancelRequest>>,
}

/// Shared view of a session, as stored in the registry
pub struct SessionHandle {
    id: u64,
    name: String,
    started_at: Instant,
    control: Mutex<Control>,
}

impl SessionHandle {
    fn new(id: u64, name: &str, cancel_tx: oneshot::Sender<CancelRequest>) -> Self {
        Self {
            id,
            name: name.to_string(),
            started_at: tokio::time::Instant::now().into_std(),
            control: Mutex::new(Control {
                state: SessionState::Active,
                cancel_tx: Some(cancel_tx),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn state(&self) -> SessionState {
        self.control.lock().state
    }

    /// Claim the session for cancellation and notify the owner.
    ///
    /// Returns the acknowledgement receiver, or `None` if the session is no
    /// longer active.
    fn request_cancel(&self) -> Option<oneshot::Receiver<()>> {
        let mut control = self.control.lock();
        if control.state != SessionState::Active {
            return None;
        }
        let cancel_tx = control.cancel_tx.take()?;
        let (done_tx, done_rx) = oneshot::channel();
        cancel_tx.send(done_tx).ok()?;
        control.state = SessionState::Completing;
        Some(done_rx)
    }

    /// Claim the session for a normal (or failed) completion.
    ///
    /// Returns `false` when a canceller got there first.
    fn begin_completion(&self) -> bool {
        let mut control = self.control.lock();
        if control.state != SessionState::Active {
            return false;
        }
        control.state = SessionState::Completing;
        control.cancel_tx = None;
        true
    }

    fn set_terminal(&self, state: SessionState) {
        debug_assert!(state.is_terminal());
        self.control.lock().state = state;
    }

    fn mark_closed(&self) {
        let mut control = self.control.lock();
        control.cancel_tx = None;
        if !control.state.is_terminal() {
            control.state = SessionState::Closed;
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Per-session tuning
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub sample_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(1000),
        }
    }
}

/// How a session ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// Stream fully received and the sink closed cleanly
    Completed(FinalReport),
    /// The client went away mid-stream; whatever arrived was kept
    Disconnected { report: FinalReport, error: String },
    /// The sink failed; the rest of the stream was not read
    Failed {
        report: FinalReport,
        error: SessionError,
    },
    /// Terminated by a cancel request
    Cancelled(FinalReport),
}

impl SessionOutcome {
    pub fn report(&self) -> &FinalReport {
        match self {
            SessionOutcome::Completed(report)
            | SessionOutcome::Cancelled(report)
            | SessionOutcome::Disconnected { report, .. }
            | SessionOutcome::Failed { report, .. } => report,
        }
    }

    pub fn state(&self) -> SessionState {
        match self {
            SessionOutcome::Cancelled(_) => SessionState::Cancelled,
            _ => SessionState::Closed,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SessionOutcome::Completed(_) => "closed",
            SessionOutcome::Disconnected { .. } => "disconnected",
            SessionOutcome::Failed { .. } => "failed",
            SessionOutcome::Cancelled(_) => "cancelled",
        }
    }
}

/// One in-flight upload
pub struct UploadSession {
    handle: Arc<SessionHandle>,
    registry: SessionRegistry,
    sink: Box<dyn WriteSink>,
    tracker: SharedTracker,
    sampler: Sampler,
    cancel_rx: oneshot::Receiver<CancelRequest>,
    transport: Option<TransportHandle>,
    finished: bool,
}

impl UploadSession {
    /// Turn a reservation into a running session and start its sampler
    pub fn start(
        reservation: Reservation,
        sink: Box<dyn WriteSink>,
        options: SessionOptions,
        transport: Option<TransportHandle>,
    ) -> Result<Self, SessionError> {
        let (handle, cancel_rx, registry) = reservation
            .into_parts()
            .ok_or_else(|| SessionError::Internal("Reservation already consumed".into()))?;

        let tracker: SharedTracker =
            Arc::new(Mutex::new(ProgressTracker::new(handle.started_at())));

        let name = handle.name().to_string();
        let sampler = Sampler::spawn(Arc::clone(&tracker), options.sample_interval, move |s| {
            info!(
                session = %name,
                total_bytes = s.total_bytes,
                delta_bytes = s.delta_bytes,
                max_gap_ms = s.max_gap.as_millis() as u64,
                "{} bytes written : {}",
                name,
                HumanBytes(s.total_bytes)
            );
        });

        info!(session = %handle.name(), "Starting to write to {} ...", handle.name());
        metrics::record_session_started();

        Ok(Self {
            handle,
            registry,
            sink,
            tracker,
            sampler,
            cancel_rx,
            transport,
            finished: false,
        })
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.handle
    }

    /// Counters shared with the sampler
    pub fn tracker(&self) -> SharedTracker {
        Arc::clone(&self.tracker)
    }

    /// Feed `body` into the session until it ends, fails or is cancelled
    pub async fn run<S, E>(mut self, mut body: S) -> SessionOutcome
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: fmt::Display,
    {
        let mut cancel_open = true;

        loop {
            tokio::select! {
                biased;
                request = &mut self.cancel_rx, if cancel_open => match request {
                    Ok(done) => {
                        drop(body);
                        return self.on_cancel(done).await;
                    }
                    Err(_) => cancel_open = false,
                },
                frame = body.next() => match frame {
                    Some(Ok(chunk)) => {
                        if let Err(e) = self.on_chunk(chunk).await {
                            drop(body);
                            return self.on_sink_error(e).await;
                        }
                    }
                    Some(Err(e)) => return self.on_transport_error(e.to_string()).await,
                    None => return self.on_end_of_stream().await,
                },
            }
        }
    }

    async fn on_chunk(&mut self, chunk: Bytes) -> Result<(), SinkError> {
        let arrived_at = tokio::time::Instant::now().into_std();
        self.sink.write(&chunk).await?;
        // Only bytes the sink accepted are counted
        self.tracker
            .lock()
            .on_data_chunk(chunk.len() as u64, arrived_at);
        Ok(())
    }

    async fn on_end_of_stream(mut self) -> SessionOutcome {
        if !self.handle.begin_completion() {
            return self.yield_to_cancel().await;
        }

        let (report, closed) = self.finish(SessionState::Closed).await;
        let outcome = match closed {
            Ok(()) => SessionOutcome::Completed(report),
            Err(e) => {
                warn!(session = %self.name(), error = %e, "Failed to close sink");
                SessionOutcome::Failed {
                    report,
                    error: e.into(),
                }
            }
        };
        self.log_outcome(&outcome);
        outcome
    }

    async fn on_transport_error(mut self, error: String) -> SessionOutcome {
        warn!(session = %self.name(), error = %error, "Client stream ended abnormally");

        if !self.handle.begin_completion() {
            return self.yield_to_cancel().await;
        }

        let (report, closed) = self.finish(SessionState::Closed).await;
        if let Err(e) = closed {
            warn!(session = %self.name(), error = %e, "Failed to close sink");
        }
        let outcome = SessionOutcome::Disconnected { report, error };
        self.log_outcome(&outcome);
        outcome
    }

    async fn on_sink_error(mut self, error: SinkError) -> SessionOutcome {
        warn!(session = %self.name(), error = %error, "Sink write failed, aborting upload");

        if !self.handle.begin_completion() {
            return self.yield_to_cancel().await;
        }

        let (report, closed) = self.finish(SessionState::Closed).await;
        if let Err(e) = closed {
            debug!(session = %self.name(), error = %e, "Close after write failure also failed");
        }
        let outcome = SessionOutcome::Failed {
            report,
            error: error.into(),
        };
        self.log_outcome(&outcome);
        outcome
    }

    async fn on_cancel(mut self, done: CancelRequest) -> SessionOutcome {
        info!(session = %self.name(), "Closing upload on request");

        if let Some(transport) = &self.transport {
            transport.abort();
        }

        let (report, closed) = self.finish(SessionState::Cancelled).await;
        if let Err(e) = closed {
            warn!(session = %self.name(), error = %e, "Failed to close sink");
        }
        let _ = done.send(());

        let outcome = SessionOutcome::Cancelled(report);
        self.log_outcome(&outcome);
        outcome
    }

    // A canceller claimed the session while we were finishing; its request
    // is already in the channel.
    async fn yield_to_cancel(mut self) -> SessionOutcome {
        match (&mut self.cancel_rx).await {
            Ok(done) => self.on_cancel(done).await,
            Err(_) => {
                let (report, _) = self.finish(SessionState::Cancelled).await;
                let outcome = SessionOutcome::Cancelled(report);
                self.log_outcome(&outcome);
                outcome
            }
        }
    }

    /// The one cleanup path: stop sampling, close the sink, deregister.
    async fn finish(&mut self, terminal: SessionState) -> (FinalReport, Result<(), SinkError>) {
        self.finished = true;
        self.sampler.stop();

        let closed = self.sink.close().await;
        let report = self
            .tracker
            .lock()
            .finalize(tokio::time::Instant::now().into_std());

        self.registry.remove(&self.handle);
        self.handle.set_terminal(terminal);

        (report, closed)
    }

    fn log_outcome(&self, outcome: &SessionOutcome) {
        let report = outcome.report();
        info!(
            session = %self.name(),
            outcome = outcome.label(),
            total_bytes = report.total_bytes,
            elapsed_ms = report.elapsed.as_millis() as u64,
            max_gap_ms = report.max_gap.as_millis() as u64,
            "End, elapsed : {} ms, received {}",
            report.elapsed.as_millis(),
            HumanBytes(report.total_bytes)
        );
        metrics::record_session_finished(outcome.label(), report);
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        if !self.finished {
            warn!(session = %self.name(), "Session dropped before finishing, releasing name");
            self.sampler.stop();
            self.handle.mark_closed();
            self.registry.remove(&self.handle);

            let report = self
                .tracker
                .lock()
                .finalize(tokio::time::Instant::now().into_std());
            metrics::record_session_finished("dropped", &report);
        }
    }
}
