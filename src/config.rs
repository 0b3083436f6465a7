//! Configuration for the focus bridge.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default execution image for the containerized engine.
pub const DEFAULT_IMAGE: &str = "focus-bridge-engine:latest";

/// Default container runtime command.
pub const DEFAULT_RUNTIME: &str = "docker";

/// How the analysis engine is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Inside a container, with frames exchanged through a bind mount.
    #[default]
    Container,
    /// As a direct child process reading the camera itself.
    Native,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Container => "container",
            BackendKind::Native => "native",
        }
    }

    /// Parse a backend name (`container`/`docker` or `native`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "container" | "docker" => Some(BackendKind::Container),
            "native" => Some(BackendKind::Native),
            _ => None,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine tunables. Unset values are omitted from the command line so the
/// engine applies its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Score below which the engine reports `distracted`
    pub focus_threshold: Option<f64>,
    /// Blinks per minute above which the engine reports `drowsy`
    pub drowsy_blink_rate: Option<f64>,
    /// Seconds without a face before the engine reports `away`
    pub away_timeout_secs: Option<f64>,
    pub talking_sensitivity: Option<f64>,
}

impl Thresholds {
    /// Command-line flags for every configured threshold.
    pub fn to_args(&self) -> Vec<String> {
        [
            ("focus_threshold", self.focus_threshold),
            ("drowsy_blink_rate", self.drowsy_blink_rate),
            ("away_timeout_secs", self.away_timeout_secs),
            ("talking_sensitivity", self.talking_sensitivity),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| format!("--{name}={v}")))
        .collect()
    }
}

/// Camera selection and geometry, used by the native backend only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub camera_index: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
}

impl CaptureConfig {
    /// Command-line flags for every configured capture setting.
    pub fn to_args(&self) -> Vec<String> {
        [
            ("camera_index", self.camera_index),
            ("capture_width", self.width),
            ("capture_height", self.height),
            ("capture_fps", self.fps),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| format!("--{name}={v}")))
        .collect()
    }
}

/// Output channels the containerized engine should emit besides `focus`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputChannels {
    pub metrics: bool,
    pub edge: bool,
}

impl Default for OutputChannels {
    fn default() -> Self {
        Self {
            metrics: true,
            edge: false,
        }
    }
}

/// Everything needed to start one bridge session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub backend: BackendKind,
    /// Container runtime command (`docker` or a compatible CLI)
    pub runtime: String,
    /// Engine credential
    pub api_key: String,
    /// Execution image identifier (container backend)
    pub image: String,
    /// Build context for the execution image
    pub build_context: PathBuf,
    /// Override for the shared frame directory
    pub shared_dir: Option<PathBuf>,
    /// Override for the native engine executable
    pub binary_path: Option<PathBuf>,
    pub thresholds: Thresholds,
    pub capture: CaptureConfig,
    pub channels: OutputChannels,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            runtime: DEFAULT_RUNTIME.to_string(),
            api_key: String::new(),
            image: DEFAULT_IMAGE.to_string(),
            build_context: PathBuf::from("engine"),
            shared_dir: None,
            binary_path: None,
            thresholds: Thresholds::default(),
            capture: CaptureConfig::default(),
            channels: OutputChannels::default(),
        }
    }
}

impl BridgeConfig {
    /// Shared frame directory: the override, or a per-user cache location.
    pub fn resolved_shared_dir(&self) -> PathBuf {
        self.shared_dir.clone().unwrap_or_else(default_shared_dir)
    }

    pub fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Default host directory for frame exchange.
pub fn default_shared_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("focus-bridge")
        .join("frames")
}

/// Persisted configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge: BridgeConfig,
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("focus-bridge")
            .join("config.json")
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
