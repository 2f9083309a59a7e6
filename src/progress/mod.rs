//! Upload progress tracking
//!
//! [`ProgressTracker`] holds the per-session counters and is mutated only on
//! data arrival. [`Sampler`] is a separate time-driven task that reads the
//! counters on a fixed period, whether or not data is flowing.

mod sampler;

pub use sampler::{Sampler, SharedTracker};

use std::fmt;
use std::time::{Duration, Instant};

/// Periodic progress snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    /// Bytes received since the session started
    pub total_bytes: u64,
    /// Bytes received since the previous sample
    pub delta_bytes: u64,
    /// Longest interval without data observed so far
    pub max_gap: Duration,
}

/// Summary produced when a session terminates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalReport {
    pub elapsed: Duration,
    pub total_bytes: u64,
    pub max_gap: Duration,
}

/// Byte and stall counters for one session
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    started_at: Instant,
    total_bytes: u64,
    bytes_at_last_sample: u64,
    last_data_at: Option<Instant>,
    max_gap: Duration,
    chunks: u64,
    samples: u64,
}

impl ProgressTracker {
    pub fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            total_bytes: 0,
            bytes_at_last_sample: 0,
            last_data_at: None,
            max_gap: Duration::ZERO,
            chunks: 0,
            samples: 0,
        }
    }

    /// Record a chunk of `size` bytes arriving at `now`.
    ///
    /// The first chunk measures its gap from the session start.
    pub fn on_data_chunk(&mut self, size: u64, now: Instant) {
        let gap = now.saturating_duration_since(self.last_data_at.unwrap_or(self.started_at));
        if gap > self.max_gap {
            self.max_gap = gap;
        }
        self.last_data_at = Some(now);
        self.total_bytes += size;
        self.chunks += 1;
    }

    /// Take a periodic snapshot and reset the delta counter
    pub fn sample_and_reset(&mut self, now: Instant) -> ProgressSample {
        self.fold_current_stall(now);
        let delta_bytes = self.total_bytes - self.bytes_at_last_sample;
        self.bytes_at_last_sample = self.total_bytes;
        self.samples += 1;

        ProgressSample {
            total_bytes: self.total_bytes,
            delta_bytes,
            max_gap: self.max_gap,
        }
    }

    /// Final elapsed time and stall figures. Safe when no data ever arrived.
    pub fn finalize(&mut self, now: Instant) -> FinalReport {
        self.fold_current_stall(now);

        FinalReport {
            elapsed: now.saturating_duration_since(self.started_at),
            total_bytes: self.total_bytes,
            max_gap: self.max_gap,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    /// Number of periodic samples taken so far
    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn max_gap(&self) -> Duration {
        self.max_gap
    }

    pub fn last_data_at(&self) -> Option<Instant> {
        self.last_data_at
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    // The open gap since the last chunk counts too
    fn fold_current_stall(&mut self, now: Instant) {
        let stall = now.saturating_duration_since(self.last_data_at.unwrap_or(self.started_at));
        if stall > self.max_gap {
            self.max_gap = stall;
        }
    }
}

/// Human readable byte count, base 1024 (`1.5 kB`, `5 MB`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumanBytes(pub u64);

impl fmt::Display for HumanBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];

        let mut value = self.0 as f64;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }

        let rendered = format!("{:.2}", value);
        let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
        write!(f, "{} {}", rendered, UNITS[unit])
    }
}
