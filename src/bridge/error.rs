//! Errors returned synchronously by the supervisor.

use crate::frames::FrameChannelError;
use std::path::PathBuf;
use std::time::Duration;

/// Reasons a bridge session could not be started.
#[derive(Debug)]
pub enum BridgeError {
    /// A session is already active on this supervisor.
    AlreadyRunning,
    /// No engine credential was configured.
    MissingCredential,
    /// The container runtime did not answer the availability probe.
    RuntimeUnavailable { runtime: String },
    /// The execution image build exited unsuccessfully.
    ImageBuildFailed { image: String, exit_code: Option<i32> },
    /// The execution image build did not finish in time.
    ImageBuildTimedOut { image: String, after: Duration },
    /// No native engine executable was found at any candidate location.
    BinaryNotFound { searched: Vec<PathBuf> },
    /// The shared frame directory could not be prepared.
    FrameChannel(FrameChannelError),
    /// The process could not be spawned at all.
    SpawnFailed { program: String, source: std::io::Error },
    /// `stop` was called while the session was still starting.
    Cancelled,
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::AlreadyRunning => write!(f, "A bridge session is already running"),
            BridgeError::MissingCredential => write!(f, "No API key configured"),
            BridgeError::RuntimeUnavailable { runtime } => {
                write!(f, "Container runtime '{runtime}' is not available")
            }
            BridgeError::ImageBuildFailed { image, exit_code } => match exit_code {
                Some(code) => write!(f, "Building image '{image}' failed with exit code {code}"),
                None => write!(f, "Building image '{image}' was terminated by a signal"),
            },
            BridgeError::ImageBuildTimedOut { image, after } => {
                write!(f, "Building image '{image}' timed out after {}s", after.as_secs())
            }
            BridgeError::BinaryNotFound { searched } => {
                write!(f, "Engine executable not found (searched: ")?;
                for (i, path) in searched.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", path.display())?;
                }
                write!(f, ")")
            }
            BridgeError::FrameChannel(e) => write!(f, "Frame channel error: {e}"),
            BridgeError::SpawnFailed { program, source } => {
                write!(f, "Failed to spawn '{program}': {source}")
            }
            BridgeError::Cancelled => write!(f, "Session was stopped while starting"),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::FrameChannel(e) => Some(e),
            BridgeError::SpawnFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<FrameChannelError> for BridgeError {
    fn from(e: FrameChannelError) -> Self {
        BridgeError::FrameChannel(e)
    }
}
