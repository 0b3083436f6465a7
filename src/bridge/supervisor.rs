//! Bridge process supervisor.
//!
//! Owns the lifecycle of the external analysis engine: backend preparation,
//! spawn, stdout decoding, notification dispatch and teardown.
//!
//! Per session, three tasks run next to the caller:
//!
//! ```text
//! stdout ──▶ reader task ──▶ LineDecoder ──▶ dispatch ──▶ Notification channel
//! stderr ──▶ logger task
//! Child  ──▶ waiter task ──(after reader drains)──▶ Close(exit code)
//! ```

use crate::bridge::backend::Backend;
use crate::bridge::container;
use crate::bridge::error::BridgeError;
use crate::bridge::notification::{Fault, Notification};
use crate::bridge::state::BridgeState;
use crate::config::{BackendKind, BridgeConfig, DEFAULT_RUNTIME};
use crate::frames::FrameChannel;
use crate::protocol::{Decoded, EngineEvent, LineDecoder};
use crate::stats::{create_shared_stats, SharedBridgeStats};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How long the waiter lets the stdout reader drain after exit.
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Handle to the spawned process.
struct ProcessHandle {
    pid: Option<u32>,
    /// Fires a forced kill in the waiter task.
    kill: Option<oneshot::Sender<()>>,
}

/// The live supervised unit.
struct Session {
    id: Uuid,
    backend: BackendKind,
    state: BridgeState,
    /// Set once the backend is prepared
    launcher: Option<Arc<Backend>>,
    process: Option<ProcessHandle>,
    frames: Option<Arc<FrameChannel>>,
    ready: bool,
}

impl Session {
    fn new(id: Uuid, backend: BackendKind) -> Self {
        Self {
            id,
            backend,
            state: BridgeState::Starting,
            launcher: None,
            process: None,
            frames: None,
            ready: false,
        }
    }
}

/// State shared between the supervisor and its stdio tasks.
struct Shared {
    session: Mutex<Option<Session>>,
    notifier: Sender<Notification>,
    stats: SharedBridgeStats,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, notification: Notification) {
        // The receiver lives in the supervisor; a send only fails once it is gone.
        let _ = self.notifier.send(notification);
    }

    /// Apply `f` to the session if it is still session `id`.
    fn with_session<R>(&self, id: Uuid, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut slot = self.slot();
        match slot.as_mut() {
            Some(session) if session.id == id => Some(f(session)),
            _ => None,
        }
    }

    /// Dispatch one decoded line of session `id`.
    fn dispatch(&self, id: Uuid, decoded: Decoded) {
        let event = match decoded {
            Decoded::Event(event) => event,
            Decoded::Unrecognized { kind } => {
                tracing::warn!("Ignoring unrecognized engine event type '{}'", kind);
                self.stats.record_unrecognized_event();
                return;
            }
            Decoded::Malformed { line, reason } => {
                tracing::warn!("Discarding malformed engine line ({}): {}", reason, line);
                self.stats.record_malformed_line();
                return;
            }
        };

        self.stats.record_event_dispatched();
        tracing::trace!("Engine event '{}'", event.tag());
        let notification = match event {
            EngineEvent::Ready => {
                self.with_session(id, |session| {
                    session.ready = true;
                    if session.state == BridgeState::RunningUnready {
                        session.state = BridgeState::Ready;
                    }
                });
                tracing::info!("Engine ready");
                Notification::Ready
            }
            EngineEvent::Status(text) => {
                tracing::debug!("Engine status: {}", text);
                Notification::Status(text)
            }
            EngineEvent::Focus(reading) => Notification::Focus(reading),
            EngineEvent::Metrics(payload) => Notification::Metrics(payload),
            EngineEvent::Edge(payload) => Notification::Edge(payload),
            EngineEvent::Error(error) => {
                tracing::warn!("Engine reported error: {}", error);
                self.stats.record_engine_error();
                Notification::Error(Fault::Engine(error))
            }
        };
        self.emit(notification);
    }

    /// Record process exit for session `id` and return its frame channel.
    fn finish(&self, id: Uuid, exit_code: Option<i32>) -> Option<Arc<FrameChannel>> {
        self.with_session(id, |session| {
            session.process = None;
            session.ready = false;
            session.state = match (session.state, exit_code) {
                (BridgeState::Stopping, _) | (_, Some(0)) => BridgeState::Stopped,
                _ => BridgeState::Error,
            };
            session.frames.take()
        })
        .flatten()
    }
}

/// Supervises one analysis engine process at a time.
///
/// Notifications are delivered in order through [`Supervisor::receiver`].
/// `start`/`stop` must be called from within a tokio runtime.
pub struct Supervisor {
    shared: Arc<Shared>,
    receiver: Receiver<Notification>,
}

impl Supervisor {
    /// Create a supervisor with its own statistics.
    pub fn new() -> Self {
        Self::with_stats(create_shared_stats())
    }

    /// Create a supervisor recording into shared statistics.
    pub fn with_stats(stats: SharedBridgeStats) -> Self {
        let (notifier, receiver) = unbounded();
        Self {
            shared: Arc::new(Shared {
                session: Mutex::new(None),
                notifier,
                stats,
            }),
            receiver,
        }
    }

    /// Start a new session.
    ///
    /// Fails with [`BridgeError::AlreadyRunning`] while another session is
    /// active, leaving that session untouched.
    pub async fn start(&self, config: BridgeConfig) -> Result<Uuid, BridgeError> {
        let id = Uuid::new_v4();
        {
            let mut slot = self.shared.slot();
            if slot.as_ref().is_some_and(|s| s.state.is_active()) {
                return Err(BridgeError::AlreadyRunning);
            }
            *slot = Some(Session::new(id, config.backend));
        }
        self.shared.stats.record_session_started();
        tracing::info!("Starting {} session {}", config.backend, id);

        match self.launch(id, &config).await {
            Ok(()) => Ok(id),
            Err(e) => {
                self.abort(id, &e);
                Err(e)
            }
        }
    }

    async fn launch(&self, id: Uuid, config: &BridgeConfig) -> Result<(), BridgeError> {
        if !config.has_credential() {
            return Err(BridgeError::MissingCredential);
        }

        let mut backend = Backend::for_config(config);
        let building = self.shared.clone();
        let shared = self.shared.clone();
        let frames = backend
            .prepare(
                config,
                &self.shared.stats,
                move || {
                    building.with_session(id, |session| {
                        if session.state == BridgeState::Starting {
                            session.state = BridgeState::Preparing;
                        }
                    });
                },
                move |line| {
                    tracing::debug!("build: {}", line);
                    shared.emit(Notification::Progress(line));
                },
            )
            .await?;

        let backend = Arc::new(backend);
        let proceed = self.shared.with_session(id, |session| {
            session.frames = frames.clone();
            session.launcher = Some(backend.clone());
            match session.state {
                BridgeState::Preparing | BridgeState::Starting => {
                    session.state = BridgeState::Starting;
                    true
                }
                _ => false,
            }
        });
        if proceed != Some(true) {
            return Err(BridgeError::Cancelled);
        }

        let args = backend.compose_args(config, frames.as_deref());
        tracing::debug!("Spawning {} {:?}", backend.program(), redact(&args));
        let mut child = backend.spawn(&args)?;

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (kill_tx, kill_rx) = oneshot::channel();

        let attached = self.shared.with_session(id, |session| {
            if session.state != BridgeState::Starting {
                return false;
            }
            session.process = Some(ProcessHandle {
                pid,
                kill: Some(kill_tx),
            });
            session.state = BridgeState::RunningUnready;
            true
        });
        if attached != Some(true) {
            if let Err(e) = child.start_kill() {
                tracing::debug!("Could not kill cancelled engine: {}", e);
            }
            return Err(BridgeError::Cancelled);
        }

        tracing::info!("Engine process started (pid {:?})", pid);

        let reader = stdout.map(|out| tokio::spawn(read_stdout(self.shared.clone(), id, out)));
        if let Some(err) = stderr {
            tokio::spawn(log_stderr(err));
        }
        tokio::spawn(watch_exit(self.shared.clone(), id, child, kill_rx, reader));
        Ok(())
    }

    /// Mark a failed start and release anything it set up.
    fn abort(&self, id: Uuid, error: &BridgeError) {
        let frames = self
            .shared
            .with_session(id, |session| {
                if session.state != BridgeState::Stopped {
                    session.state = BridgeState::Error;
                }
                session.process = None;
                session.frames.take()
            })
            .flatten();
        if let Some(frames) = frames {
            frames.cleanup();
        }

        tracing::error!("Failed to start session {}: {}", id, error);
        if let BridgeError::SpawnFailed { .. } = error {
            self.shared.emit(Notification::Error(Fault::Process(error.to_string())));
        }
    }

    /// Stop the active session. A no-op when nothing is active or a stop is
    /// already in progress.
    ///
    /// Writes the end-of-stream marker, requests graceful termination,
    /// schedules a forced kill, and removes the frame directory. Does not
    /// wait for the process to exit; `Close` is emitted when it does.
    pub async fn stop(&self) {
        let (launcher, process, frames) = {
            let mut slot = self.shared.slot();
            let Some(session) = slot.as_mut() else {
                return;
            };
            if !session.state.is_active() || session.state == BridgeState::Stopping {
                return;
            }
            tracing::info!("Stopping session {}", session.id);

            let process = session
                .process
                .as_mut()
                .map(|p| (p.pid, p.kill.take()));
            session.state = if process.is_some() {
                BridgeState::Stopping
            } else {
                // Not spawned yet; launch() sees this and bails out
                BridgeState::Stopped
            };
            (session.launcher.clone(), process, session.frames.clone())
        };

        if let Some(ref frames) = frames {
            frames.write_end_of_stream();
        }

        if let (Some(launcher), Some((pid, kill))) = (launcher, process) {
            launcher.terminate(pid);
            if let Some(kill) = kill {
                let delay = launcher.kill_delay();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    // Err means the process already exited
                    if kill.send(()).is_ok() {
                        tracing::debug!("Forced kill requested after {:?}", delay);
                    }
                });
            }
        }

        if let Some(frames) = frames {
            frames.cleanup();
        }
    }

    /// Probe the default container runtime.
    pub async fn is_docker_available(&self) -> bool {
        container::probe_runtime(DEFAULT_RUNTIME).await
    }

    /// Make sure the execution image exists, building it if necessary.
    /// Build output is reported as `Progress` notifications.
    pub async fn prepare_image(&self, config: &BridgeConfig) -> Result<(), BridgeError> {
        if !container::probe_runtime(&config.runtime).await {
            return Err(BridgeError::RuntimeUnavailable {
                runtime: config.runtime.clone(),
            });
        }
        if container::image_exists(&config.runtime, &config.image).await {
            tracing::info!("Image {} already present", config.image);
            return Ok(());
        }
        let shared = self.shared.clone();
        container::build_image(&config.runtime, &config.image, &config.build_context, move |line| {
            shared.emit(Notification::Progress(line))
        })
        .await
    }

    /// True only while a process exists and has reported `ready`.
    pub fn running(&self) -> bool {
        self.shared
            .slot()
            .as_ref()
            .is_some_and(|s| s.process.is_some() && s.ready)
    }

    /// State of the current (or most recent) session.
    pub fn state(&self) -> BridgeState {
        self.shared
            .slot()
            .as_ref()
            .map(|s| s.state)
            .unwrap_or_default()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.shared.slot().as_ref().map(|s| s.id)
    }

    pub fn backend(&self) -> Option<BackendKind> {
        self.shared.slot().as_ref().map(|s| s.backend)
    }

    /// Frame channel of the active containerized session.
    pub fn frame_channel(&self) -> Option<Arc<FrameChannel>> {
        self.shared
            .slot()
            .as_ref()
            .filter(|s| s.state.is_active())
            .and_then(|s| s.frames.clone())
    }

    /// Receiver for session notifications.
    pub fn receiver(&self) -> &Receiver<Notification> {
        &self.receiver
    }

    /// Try to receive a notification without blocking.
    pub fn try_recv(&self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }

    pub fn stats(&self) -> &SharedBridgeStats {
        &self.shared.stats
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let leftovers = self.shared.slot().as_mut().map(|session| {
            let kill = session.process.as_mut().and_then(|p| p.kill.take());
            (kill, session.frames.take())
        });
        if let Some((kill, frames)) = leftovers {
            if let Some(kill) = kill {
                tracing::debug!("Supervisor dropped with a live engine; killing it");
                let _ = kill.send(());
            }
            if let Some(frames) = frames {
                frames.cleanup();
            }
        }
    }
}

/// Hide the credential in logged argument lists.
fn redact(args: &[String]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            if arg.starts_with("--api_key=") {
                "--api_key=***".to_string()
            } else if arg.starts_with(&format!("{}=", container::API_KEY_ENV)) {
                format!("{}=***", container::API_KEY_ENV)
            } else {
                arg.clone()
            }
        })
        .collect()
}

async fn read_stdout(shared: Arc<Shared>, id: Uuid, mut stdout: ChildStdout) {
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for decoded in decoder.feed(&buf[..n]) {
                    shared.dispatch(id, decoded);
                }
            }
            Err(e) => {
                tracing::warn!("Error reading engine stdout: {}", e);
                break;
            }
        }
    }

    let leftover = decoder.take_pending();
    if !leftover.is_empty() {
        tracing::debug!(
            "Discarding {} bytes of unterminated engine output",
            leftover.len()
        );
    }
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if !line.trim().is_empty() => tracing::debug!("engine stderr: {}", line),
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Error reading engine stderr: {}", e);
                break;
            }
        }
    }
}

async fn watch_exit(
    shared: Arc<Shared>,
    id: Uuid,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    reader: Option<JoinHandle<()>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = kill_rx => {
            tracing::warn!("Engine did not exit in time; killing it");
            if let Err(e) = child.start_kill() {
                tracing::debug!("Kill failed: {}", e);
            }
            child.wait().await
        }
    };

    // Every event the process printed is dispatched before Close.
    if let Some(reader) = reader {
        if tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, reader).await.is_err() {
            tracing::debug!("Engine stdout still open after exit; not waiting further");
        }
    }

    let exit_code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            tracing::warn!("Failed to wait for engine process: {}", e);
            None
        }
    };

    if let Some(frames) = shared.finish(id, exit_code) {
        frames.cleanup();
    }

    match exit_code {
        Some(0) => tracing::info!("Engine exited cleanly"),
        Some(code) => tracing::warn!("Engine exited with code {}", code),
        None => tracing::warn!("Engine terminated by signal"),
    }
    shared.emit(Notification::Close(exit_code));
}
