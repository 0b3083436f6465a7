//! Focus Bridge - supervisor for an external attention-analysis engine.
//!
//! The engine is an opaque process. This crate starts it (in a container or
//! as a native child), feeds it camera frames through a shared directory and
//! turns its newline-delimited JSON output into typed notifications.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Focus Bridge                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   files    ┌─────────────┐                 │
//! │  │   Frame     │──────────▶│   Engine    │                 │
//! │  │  Channel    │  /frames   │  (process)  │                 │
//! │  └─────────────┘            └─────────────┘                 │
//! │         ▲                          │ stdout (JSONL)          │
//! │         │                          ▼                         │
//! │  ┌─────────────┐            ┌─────────────┐                 │
//! │  │ Supervisor  │◀──────────│   Codec     │                 │
//! │  │             │  events    │ (protocol)  │                 │
//! │  └─────────────┘            └─────────────┘                 │
//! │         │                                                    │
//! │         ▼                                                    │
//! │   Notification channel ──▶ caller                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use focus_bridge::{BridgeConfig, Notification, Supervisor};
//!
//! # async fn run() -> Result<(), focus_bridge::BridgeError> {
//! let supervisor = Supervisor::new();
//! let config = BridgeConfig {
//!     api_key: "my-key".to_string(),
//!     ..Default::default()
//! };
//! supervisor.start(config).await?;
//!
//! if let Some(frames) = supervisor.frame_channel() {
//!     frames.write_frame(1_000, &[0xFF, 0xD8]);
//! }
//!
//! while let Ok(notification) = supervisor.receiver().recv() {
//!     if let Notification::Close(_) = notification {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod frames;
pub mod protocol;
pub mod stats;

// Re-export key types at crate root for convenience
pub use bridge::{BridgeError, BridgeState, Fault, Notification, Supervisor};
pub use config::{BackendKind, BridgeConfig, Config};
pub use frames::FrameChannel;
pub use protocol::{EngineError, EngineEvent, FocusReading, FocusState};
pub use stats::{BridgeStats, FocusTally, SharedBridgeStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
