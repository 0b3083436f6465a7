//! Engine process supervision.
//!
//! The supervisor starts the analysis engine through one of two backends,
//! decodes its stdout event stream and forwards typed notifications to the
//! caller.

pub mod backend;
pub mod container;
pub mod error;
pub mod native;
pub mod notification;
pub mod state;
pub mod supervisor;

// Re-export commonly used types
pub use backend::Backend;
pub use error::BridgeError;
pub use notification::{Fault, Notification};
pub use state::BridgeState;
pub use supervisor::Supervisor;
