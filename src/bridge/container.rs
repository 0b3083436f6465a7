//! Container runtime backend.
//!
//! The engine runs in a container with the shared frame directory
//! bind-mounted at `/frames`. All runtime interaction goes through the
//! runtime's CLI (`docker` or a compatible command).

use crate::bridge::error::BridgeError;
use crate::config::BridgeConfig;
use crate::frames::{FrameChannel, CONTAINER_FRAME_DIR};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

/// Fixed name of the engine container.
pub const CONTAINER_NAME: &str = "focus-bridge-engine";

/// Platform the execution image is built and run for.
pub const PLATFORM: &str = "linux/amd64";

/// Environment variable carrying the credential into the container.
pub const API_KEY_ENV: &str = "FOCUS_API_KEY";

/// Upper bound for the availability probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for an image build.
pub const BUILD_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Grace period handed to `docker stop` before the runtime kills the engine.
pub const STOP_GRACE_SECS: u64 = 3;

/// Delay after which the `docker run` client itself is killed if it is
/// still attached.
pub const CLIENT_KILL_DELAY: Duration = Duration::from_secs(STOP_GRACE_SECS + 5);

/// Build output lines longer than this are cut before being reported.
pub const PROGRESS_LINE_LIMIT: usize = 160;

const DNS_SERVERS: [&str; 2] = ["8.8.8.8", "1.1.1.1"];

/// Delay (ms) between directory rescans inside the engine.
const RESCAN_DELAY_MS: u32 = 10;

/// Check whether the runtime answers `info` within [`PROBE_TIMEOUT`].
///
/// Never fails; any error counts as unavailable.
pub async fn probe_runtime(runtime: &str) -> bool {
    let mut cmd = Command::new(runtime);
    cmd.arg("info")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(PROBE_TIMEOUT, cmd.status()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            tracing::debug!("Runtime probe '{}' failed to run: {}", runtime, e);
            false
        }
        Err(_) => {
            tracing::debug!("Runtime probe '{}' timed out", runtime);
            false
        }
    }
}

/// Whether `image` is present locally.
pub async fn image_exists(runtime: &str, image: &str) -> bool {
    let mut cmd = Command::new(runtime);
    cmd.args(["image", "inspect", image])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    matches!(cmd.status().await, Ok(status) if status.success())
}

/// Build `image` from `context`, reporting each output line through
/// `progress`.
pub async fn build_image<F>(
    runtime: &str,
    image: &str,
    context: &Path,
    mut progress: F,
) -> Result<(), BridgeError>
where
    F: FnMut(String),
{
    tracing::info!("Building image {} from {:?}", image, context);

    let mut cmd = Command::new(runtime);
    cmd.args(["build", "--platform", PLATFORM, "-t", image])
        .arg(context)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| BridgeError::SpawnFailed {
        program: runtime.to_string(),
        source,
    })?;

    // Build tools report progress on both streams; merge them in arrival order.
    let (tx, mut rx) = unbounded_channel::<String>();
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    let build = async {
        while let Some(line) = rx.recv().await {
            progress(truncate_line(&line));
        }
        child.wait().await
    };

    let outcome = tokio::time::timeout(BUILD_TIMEOUT, build).await;
    match outcome {
        Ok(Ok(status)) if status.success() => {
            tracing::info!("Image {} built", image);
            Ok(())
        }
        Ok(Ok(status)) => Err(BridgeError::ImageBuildFailed {
            image: image.to_string(),
            exit_code: status.code(),
        }),
        Ok(Err(source)) => Err(BridgeError::SpawnFailed {
            program: runtime.to_string(),
            source,
        }),
        Err(_) => {
            if let Err(e) = child.start_kill() {
                tracing::debug!("Could not kill timed-out build: {}", e);
            }
            Err(BridgeError::ImageBuildTimedOut {
                image: image.to_string(),
                after: BUILD_TIMEOUT,
            })
        }
    }
}

/// Remove a leftover container with the engine's name. Best-effort.
pub async fn remove_stale_container(runtime: &str, name: &str) {
    let mut cmd = Command::new(runtime);
    cmd.args(["rm", "-f", name])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match cmd.status().await {
        Ok(status) if status.success() => tracing::debug!("Removed stale container {}", name),
        Ok(_) => tracing::debug!("No stale container {} to remove", name),
        Err(e) => tracing::debug!("Could not run '{} rm': {}", runtime, e),
    }
}

/// Full argument list for `<runtime> run ...`.
pub fn run_args(config: &BridgeConfig, channel: &FrameChannel) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "--rm".into(),
        "--platform".into(),
        PLATFORM.into(),
        "--name".into(),
        CONTAINER_NAME.into(),
    ];
    for dns in DNS_SERVERS {
        args.push("--dns".into());
        args.push(dns.into());
    }
    args.push("-v".into());
    args.push(format!(
        "{}:{}",
        channel.host_dir().display(),
        CONTAINER_FRAME_DIR
    ));
    args.push("-e".into());
    args.push(format!("{API_KEY_ENV}={}", config.api_key));
    args.push(config.image.clone());

    // Engine flags
    args.push("--server_mode".into());
    args.push(format!("--input_pattern={}", channel.container_pattern()));
    args.push("--erase_read_files".into());
    args.push(format!("--rescan_delay_ms={RESCAN_DELAY_MS}"));
    args.push(format!("--enable_metrics={}", config.channels.metrics));
    args.push(format!("--enable_edge={}", config.channels.edge));
    args.extend(config.thresholds.to_args());
    args
}

/// Ask the runtime to stop the engine container. Returns immediately; the
/// stop command runs in the background.
pub fn request_stop(runtime: &str, name: &str) {
    let mut cmd = Command::new(runtime);
    cmd.args(["stop", "-t", &STOP_GRACE_SECS.to_string(), name])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let runtime = runtime.to_string();
    tokio::spawn(async move {
        match cmd.status().await {
            Ok(status) if status.success() => tracing::debug!("Container stop acknowledged"),
            Ok(status) => tracing::debug!("'{} stop' exited with {}", runtime, status),
            Err(e) => tracing::warn!("Could not run '{} stop': {}", runtime, e),
        }
    });
}

fn truncate_line(line: &str) -> String {
    let line = line.trim_end();
    if line.chars().count() <= PROGRESS_LINE_LIMIT {
        line.to_string()
    } else {
        let mut cut: String = line.chars().take(PROGRESS_LINE_LIMIT).collect();
        cut.push('…');
        cut
    }
}

async fn forward_lines<R>(reader: R, tx: UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if tx.send(line).is_err() {
            break;
        }
    }
}
