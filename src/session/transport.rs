//! Abort signal for the connection carrying an upload

use std::sync::Arc;
use tokio::sync::watch;

/// Shared abort flag for one client connection.
///
/// The server's connection task waits on [`TransportHandle::aborted`] next to
/// the hyper connection future and drops the connection once it fires. A
/// cancelled session calls [`TransportHandle::abort`].
#[derive(Debug, Clone)]
pub struct TransportHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl TransportHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request the connection be torn down. Repeated calls are no-ops.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`abort`](Self::abort) has been called
    pub async fn aborted(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|aborted| *aborted).await;
    }
}

impl Default for TransportHandle {
    fn default() -> Self {
        Self::new()
    }
}
