//! Bridge activity counters.
//!
//! Tracks what the bridge did during a run (frames handed over, events
//! decoded, lines discarded) without retaining any analysis content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters shared by the supervisor and the frame channel.
#[derive(Debug)]
pub struct BridgeStats {
    sessions_started: AtomicU64,
    frames_written: AtomicU64,
    frames_dropped: AtomicU64,
    events_dispatched: AtomicU64,
    malformed_lines: AtomicU64,
    unrecognized_events: AtomicU64,
    engine_errors: AtomicU64,
    created_at: DateTime<Utc>,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self {
            sessions_started: AtomicU64::new(0),
            frames_written: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            events_dispatched: AtomicU64::new(0),
            malformed_lines: AtomicU64::new(0),
            unrecognized_events: AtomicU64::new(0),
            engine_errors: AtomicU64::new(0),
            created_at: Utc::now(),
        }
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_written(&self) {
        self.frames_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_line(&self) {
        self.malformed_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unrecognized_event(&self) {
        self.unrecognized_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_engine_error(&self) {
        self.engine_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current counter values.
    pub fn stats(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            unrecognized_events: self.unrecognized_events.load(Ordering::Relaxed),
            engine_errors: self.engine_errors.load(Ordering::Relaxed),
            created_at: self.created_at,
            uptime_secs: (Utc::now() - self.created_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Bridge Statistics:\n\
             - Sessions started: {}\n\
             - Frames written: {}\n\
             - Frames dropped: {}\n\
             - Events dispatched: {}\n\
             - Malformed lines discarded: {}\n\
             - Unrecognized events discarded: {}\n\
             - Engine errors reported: {}\n\
             - Uptime: {} seconds",
            stats.sessions_started,
            stats.frames_written,
            stats.frames_dropped,
            stats.events_dispatched,
            stats.malformed_lines,
            stats.unrecognized_events,
            stats.engine_errors,
            stats.uptime_secs
        )
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.sessions_started.store(0, Ordering::Relaxed);
        self.frames_written.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.events_dispatched.store(0, Ordering::Relaxed);
        self.malformed_lines.store(0, Ordering::Relaxed);
        self.unrecognized_events.store(0, Ordering::Relaxed);
        self.engine_errors.store(0, Ordering::Relaxed);
    }
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatsSnapshot {
    pub sessions_started: u64,
    pub frames_written: u64,
    pub frames_dropped: u64,
    pub events_dispatched: u64,
    pub malformed_lines: u64,
    pub unrecognized_events: u64,
    pub engine_errors: u64,
    pub created_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Thread-safe shared counters.
pub type SharedBridgeStats = Arc<BridgeStats>;

/// Create a new set of shared counters.
pub fn create_shared_stats() -> SharedBridgeStats {
    Arc::new(BridgeStats::new())
}
