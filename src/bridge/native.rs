//! Native backend: the engine runs as a direct child process and reads the
//! camera itself.

use crate::bridge::error::BridgeError;
use crate::config::BridgeConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable pointing at the engine executable.
pub const ENGINE_ENV: &str = "FOCUS_BRIDGE_ENGINE";

/// Delay between the soft termination signal and a forced kill.
pub const KILL_DELAY: Duration = Duration::from_secs(3);

/// File name of the engine executable.
pub fn engine_file_name() -> &'static str {
    if cfg!(windows) {
        "focus_engine.exe"
    } else {
        "focus_engine"
    }
}

/// Candidate executable locations, highest priority first.
pub fn candidate_paths(binary_override: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Check config override first
    if let Some(path) = binary_override {
        candidates.push(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(ENGINE_ENV) {
        if !path.trim().is_empty() {
            candidates.push(PathBuf::from(path));
        }
    }

    // Development build inside the working tree
    candidates.push(Path::new("engine").join("build").join(engine_file_name()));

    // Installed alongside the current executable
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join("resources").join(engine_file_name()));
        if cfg!(target_os = "macos") {
            candidates.push(exe_dir.join("../Resources").join(engine_file_name()));
        }
    }

    candidates
}

/// Resolve the engine executable, failing with `BinaryNotFound` when none of
/// the candidates exists.
pub fn resolve_binary(binary_override: Option<&Path>) -> Result<PathBuf, BridgeError> {
    let candidates = candidate_paths(binary_override);
    match candidates.iter().find(|path| path.is_file()) {
        Some(path) => {
            tracing::debug!("Using engine executable {:?}", path);
            Ok(path.clone())
        }
        None => Err(BridgeError::BinaryNotFound {
            searched: candidates,
        }),
    }
}

/// Engine arguments for the native backend.
pub fn engine_args(config: &BridgeConfig) -> Vec<String> {
    let mut args = vec![format!("--api_key={}", config.api_key)];
    args.extend(config.capture.to_args());
    args.extend(config.thresholds.to_args());
    args
}

/// Send the soft termination signal to `pid`.
///
/// Returns `false` when no signal could be delivered (unsupported platform
/// or process already gone); the caller's forced kill covers that case.
#[cfg(unix)]
pub fn request_termination(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        tracing::debug!(
            "SIGTERM to {} failed: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
    rc == 0
}

#[cfg(not(unix))]
pub fn request_termination(_pid: u32) -> bool {
    false
}
