//! Execution backends.
//!
//! Both variants offer the same capabilities (`prepare`, `compose_args`,
//! `spawn`, `terminate`). The variant is chosen once per session from the
//! configuration and never changes afterwards.

use crate::bridge::container::{self, CONTAINER_NAME};
use crate::bridge::error::BridgeError;
use crate::bridge::native;
use crate::config::{BackendKind, BridgeConfig};
use crate::frames::FrameChannel;
use crate::stats::SharedBridgeStats;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Container runtime backend state.
#[derive(Debug, Clone)]
pub struct ContainerBackend {
    runtime: String,
}

/// Native child-process backend state.
#[derive(Debug, Clone, Default)]
pub struct NativeBackend {
    /// Resolved during `prepare`
    binary: Option<PathBuf>,
}

/// The execution backend of a session.
#[derive(Debug, Clone)]
pub enum Backend {
    Container(ContainerBackend),
    Native(NativeBackend),
}

impl Backend {
    /// Select the backend named by the configuration.
    pub fn for_config(config: &BridgeConfig) -> Self {
        match config.backend {
            BackendKind::Container => Backend::Container(ContainerBackend {
                runtime: config.runtime.clone(),
            }),
            BackendKind::Native => Backend::Native(NativeBackend::default()),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Container(_) => BackendKind::Container,
            Backend::Native(_) => BackendKind::Native,
        }
    }

    /// Verify prerequisites and set up what the process needs before spawn.
    ///
    /// `on_build` runs once, right before an image build starts. The
    /// container backend returns the initialized frame channel.
    pub async fn prepare<B, F>(
        &mut self,
        config: &BridgeConfig,
        stats: &SharedBridgeStats,
        on_build: B,
        progress: F,
    ) -> Result<Option<Arc<FrameChannel>>, BridgeError>
    where
        B: FnOnce(),
        F: FnMut(String),
    {
        match self {
            Backend::Container(backend) => {
                if !container::probe_runtime(&backend.runtime).await {
                    return Err(BridgeError::RuntimeUnavailable {
                        runtime: backend.runtime.clone(),
                    });
                }

                if !container::image_exists(&backend.runtime, &config.image).await {
                    tracing::info!("Image {} not found locally", config.image);
                    on_build();
                    container::build_image(
                        &backend.runtime,
                        &config.image,
                        &config.build_context,
                        progress,
                    )
                    .await?;
                }

                container::remove_stale_container(&backend.runtime, CONTAINER_NAME).await;

                let channel = FrameChannel::new(config.resolved_shared_dir()).with_stats(stats.clone());
                channel.init()?;
                Ok(Some(Arc::new(channel)))
            }
            Backend::Native(backend) => {
                backend.binary = Some(native::resolve_binary(config.binary_path.as_deref())?);
                Ok(None)
            }
        }
    }

    /// Program to execute; only meaningful after `prepare`.
    pub fn program(&self) -> String {
        match self {
            Backend::Container(backend) => backend.runtime.clone(),
            Backend::Native(backend) => backend
                .binary
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }
    }

    /// Full argument list for the process.
    pub fn compose_args(&self, config: &BridgeConfig, channel: Option<&FrameChannel>) -> Vec<String> {
        match (self, channel) {
            (Backend::Container(_), Some(channel)) => container::run_args(config, channel),
            (Backend::Container(_), None) => {
                // prepare() always yields a channel for this backend
                let channel = FrameChannel::new(config.resolved_shared_dir());
                container::run_args(config, &channel)
            }
            (Backend::Native(_), _) => native::engine_args(config),
        }
    }

    /// Spawn the process with piped stdout/stderr.
    pub fn spawn(&self, args: &[String]) -> Result<Child, BridgeError> {
        let program = self.program();
        let mut cmd = Command::new(&program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.spawn()
            .map_err(|source| BridgeError::SpawnFailed { program, source })
    }

    /// Request graceful termination. Does not wait for the process to exit.
    pub fn terminate(&self, pid: Option<u32>) {
        match self {
            Backend::Container(backend) => container::request_stop(&backend.runtime, CONTAINER_NAME),
            Backend::Native(_) => {
                let delivered = pid.map(native::request_termination).unwrap_or(false);
                if !delivered {
                    tracing::debug!("No soft termination delivered; relying on forced kill");
                }
            }
        }
    }

    /// How long to wait after `terminate` before killing the process.
    pub fn kill_delay(&self) -> Duration {
        match self {
            Backend::Container(_) => container::CLIENT_KILL_DELAY,
            Backend::Native(_) => native::KILL_DELAY,
        }
    }
}
