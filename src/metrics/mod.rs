//! Metrics module
//!
//! Provides Prometheus metrics for upload sessions and request errors.

pub mod server;

use crate::progress::FinalReport;
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_int_gauge, Counter,
    CounterVec, Histogram, IntGauge,
};

lazy_static! {
    // Session metrics
    pub static ref SESSIONS_STARTED: Counter = register_counter!(
        "ingest_sessions_started_total",
        "Total number of upload sessions started"
    ).unwrap();

    pub static ref SESSIONS_FINISHED: CounterVec = register_counter_vec!(
        "ingest_sessions_finished_total",
        "Upload sessions by terminal outcome",
        &["outcome"]  // "closed", "disconnected", "failed", "cancelled", "dropped"
    ).unwrap();

    pub static ref ACTIVE_SESSIONS: IntGauge = register_int_gauge!(
        "ingest_active_sessions",
        "Upload sessions currently in flight"
    ).unwrap();

    pub static ref BYTES_RECEIVED: Counter = register_counter!(
        "ingest_bytes_received_total",
        "Total bytes received across all sessions"
    ).unwrap();

    pub static ref SESSION_DURATION: Histogram = register_histogram!(
        "ingest_session_duration_seconds",
        "Upload session duration in seconds",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0, 300.0]
    ).unwrap();

    pub static ref SESSION_MAX_GAP: Histogram = register_histogram!(
        "ingest_session_max_gap_seconds",
        "Longest stall between data chunks per session",
        vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "ingest_errors_total",
        "Total request errors",
        &["kind"]
    ).unwrap();
}

/// Record a session leaving the registry reservation stage
pub fn record_session_started() {
    SESSIONS_STARTED.inc();
    ACTIVE_SESSIONS.inc();
}

/// Record a session reaching a terminal state
pub fn record_session_finished(outcome: &str, report: &FinalReport) {
    ACTIVE_SESSIONS.dec();
    SESSIONS_FINISHED.with_label_values(&[outcome]).inc();
    BYTES_RECEIVED.inc_by(report.total_bytes as f64);
    SESSION_DURATION.observe(report.elapsed.as_secs_f64());
    SESSION_MAX_GAP.observe(report.max_gap.as_secs_f64());
}

/// Record a request error by kind
pub fn record_error(kind: &str) {
    ERRORS_TOTAL.with_label_values(&[kind]).inc();
}
