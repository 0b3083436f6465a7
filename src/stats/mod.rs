//! Run statistics for the bridge.
//!
//! Counters describe what the bridge moved between caller and engine; the
//! focus tally aggregates readings for display at the end of a run.

pub mod counters;
pub mod focus;

pub use counters::{create_shared_stats, BridgeStats, BridgeStatsSnapshot, SharedBridgeStats};
pub use focus::{FocusSummary, FocusTally};
