//! Session lifecycle states.

use serde::Serialize;

/// Lifecycle of one bridge session.
///
/// `Idle → Preparing → Starting → RunningUnready → Ready → Stopping → Stopped`,
/// with `Error` reachable from every non-terminal state. A session enters
/// `Preparing` only while its execution image is being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    #[default]
    Idle,
    Preparing,
    Starting,
    RunningUnready,
    Ready,
    Stopping,
    Stopped,
    Error,
}

impl BridgeState {
    /// Whether a session in this state blocks a new `start`.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            BridgeState::Preparing
                | BridgeState::Starting
                | BridgeState::RunningUnready
                | BridgeState::Ready
                | BridgeState::Stopping
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BridgeState::Stopped | BridgeState::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Idle => "idle",
            BridgeState::Preparing => "preparing",
            BridgeState::Starting => "starting",
            BridgeState::RunningUnready => "running-unready",
            BridgeState::Ready => "ready",
            BridgeState::Stopping => "stopping",
            BridgeState::Stopped => "stopped",
            BridgeState::Error => "error",
        }
    }
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
