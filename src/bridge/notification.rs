//! Typed notifications delivered to the caller, in stream order.

use crate::protocol::{EngineError, FocusReading};
use serde_json::Value;

/// Something that went wrong after `start` returned.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Reported by the engine through an `error` event.
    Engine(EngineError),
    /// The process itself failed outside the event stream.
    Process(String),
}

impl Fault {
    pub fn message(&self) -> &str {
        match self {
            Fault::Engine(e) => &e.message,
            Fault::Process(msg) => msg,
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::Engine(e) => write!(f, "engine: {e}"),
            Fault::Process(msg) => write!(f, "process: {msg}"),
        }
    }
}

/// Outward notification from a bridge session.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// One (truncated) line of image build output.
    Progress(String),
    Ready,
    Status(String),
    Focus(FocusReading),
    Metrics(Value),
    Edge(Value),
    Error(Fault),
    /// The process exited; `None` when it was killed by a signal.
    Close(Option<i32>),
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Progress(_) => "progress",
            Notification::Ready => "ready",
            Notification::Status(_) => "status",
            Notification::Focus(_) => "focus",
            Notification::Metrics(_) => "metrics",
            Notification::Edge(_) => "edge",
            Notification::Error(_) => "error",
            Notification::Close(_) => "close",
        }
    }
}
