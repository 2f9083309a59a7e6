//! Time-driven progress sampler
//!
//! Each session owns one [`Sampler`]. It ticks on a fixed period from a
//! tokio interval, independent of data arrival, and hands every
//! [`ProgressSample`] to a callback.

use super::{ProgressSample, ProgressTracker};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Tracker shared between the session task and its sampler
pub type SharedTracker = Arc<Mutex<ProgressTracker>>;

/// Handle to a running sampling task
pub struct Sampler {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Sampler {
    /// Start sampling `tracker` every `period`; the first tick fires one
    /// period after start.
    pub fn spawn<F>(tracker: SharedTracker, period: Duration, mut on_sample: F) -> Self
    where
        F: FnMut(ProgressSample) + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let sample = tracker.lock().sample_and_reset(Instant::now().into_std());
                        on_sample(sample);
                    }
                }
            }
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Stop the task. Returns `false` if it was already stopped.
    pub fn stop(&mut self) -> bool {
        let Some(stop_tx) = self.stop_tx.take() else {
            return false;
        };
        let _ = stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.stop();
    }
}
