//! Session registry
//!
//! Maps session names to the shared handle of the in-flight upload. The
//! registry is a plain value: create one per server (or per test) and clone
//! it wherever it is needed; clones share the same map.

use super::{validate_name, CancelRequest, SessionError, SessionHandle};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Name -> active session lookup with uniqueness enforcement
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<SessionHandle>>>,
    next_id: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name` for a new session.
    ///
    /// The handle is fully built before it is inserted, and the insert happens
    /// under the map's entry lock, so a concurrent reservation of the same
    /// name sees either nothing or the complete handle.
    pub fn reserve(&self, name: &str) -> Result<Reservation, SessionError> {
        validate_name(name)?;

        match self.sessions.entry(name.to_string()) {
            Entry::Occupied(_) => Err(SessionError::Conflict(name.to_string())),
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (cancel_tx, cancel_rx) = oneshot::channel();
                let handle = Arc::new(SessionHandle::new(id, name, cancel_tx));
                vacant.insert(Arc::clone(&handle));
                debug!(session = %name, id, "Session reserved");

                Ok(Reservation {
                    handle: Some(handle),
                    cancel_rx: Some(cancel_rx),
                    registry: self.clone(),
                })
            }
        }
    }

    /// Look up the active session called `name`
    pub fn lookup(&self, name: &str) -> Option<Arc<SessionHandle>> {
        self.sessions
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    /// Remove `handle`'s entry. A newer session that reused the name is left
    /// alone. Returns whether an entry was removed.
    pub fn remove(&self, handle: &SessionHandle) -> bool {
        self.sessions
            .remove_if(handle.name(), |_, current| current.id() == handle.id())
            .is_some()
    }

    /// Cancel the session called `name` and wait until it has cleaned up.
    ///
    /// Fails with `NotFound` when no such session exists, or when the session
    /// is already finishing on its own.
    pub async fn cancel(&self, name: &str) -> Result<(), SessionError> {
        let handle = self
            .lookup(name)
            .ok_or_else(|| SessionError::NotFound(name.to_string()))?;

        let done = handle
            .request_cancel()
            .ok_or_else(|| SessionError::NotFound(name.to_string()))?;

        // The owner acknowledges after cleanup; a dropped owner has cleaned up
        // through Drop instead.
        let _ = done.await;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Names of all active sessions, unordered
    pub fn names(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }
}

/// A claimed name that has not been turned into a running session yet.
///
/// Dropping it releases the name.
pub struct Reservation {
    handle: Option<Arc<SessionHandle>>,
    cancel_rx: Option<oneshot::Receiver<CancelRequest>>,
    registry: SessionRegistry,
}

impl Reservation {
    pub fn name(&self) -> &str {
        self.handle.as_ref().map(|h| h.name()).unwrap_or_default()
    }

    pub(crate) fn into_parts(
        mut self,
    ) -> Option<(
        Arc<SessionHandle>,
        oneshot::Receiver<CancelRequest>,
        SessionRegistry,
    )> {
        let handle = self.handle.take()?;
        let cancel_rx = self.cancel_rx.take()?;
        Some((handle, cancel_rx, self.registry.clone()))
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.mark_closed();
            self.registry.remove(&handle);
            debug!(session = %handle.name(), "Reservation released");
        }
    }
}
