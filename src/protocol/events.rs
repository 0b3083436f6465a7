//! Event records emitted by the analysis engine.
//!
//! Each record is one JSON object per line: `{"type": <tag>, "data": {...}}`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Discrete attention state reported with each focus reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusState {
    Focused,
    Distracted,
    Drowsy,
    Stressed,
    Away,
    Talking,
    #[default]
    Unknown,
}

impl FocusState {
    pub const ALL: [FocusState; 7] = [
        FocusState::Focused,
        FocusState::Distracted,
        FocusState::Drowsy,
        FocusState::Stressed,
        FocusState::Away,
        FocusState::Talking,
        FocusState::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FocusState::Focused => "focused",
            FocusState::Distracted => "distracted",
            FocusState::Drowsy => "drowsy",
            FocusState::Stressed => "stressed",
            FocusState::Away => "away",
            FocusState::Talking => "talking",
            FocusState::Unknown => "unknown",
        }
    }

    /// Parse a wire tag. Anything outside the fixed set maps to `Unknown`.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "focused" => FocusState::Focused,
            "distracted" => FocusState::Distracted,
            "drowsy" => FocusState::Drowsy,
            "stressed" => FocusState::Stressed,
            "away" => FocusState::Away,
            "talking" => FocusState::Talking,
            _ => FocusState::Unknown,
        }
    }
}

impl std::fmt::Display for FocusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FocusState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let tag = Option::<String>::deserialize(deserializer)?;
        Ok(tag.map(|t| FocusState::from_tag(&t)).unwrap_or_default())
    }
}

/// Attention/biometric payload of a `focus` event.
///
/// Fields the engine adds later are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusReading {
    pub state: FocusState,
    #[serde(deserialize_with = "null_as_default")]
    pub focus_score: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub face_detected: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub is_talking: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub is_blinking: bool,
    /// Blinks per minute
    #[serde(deserialize_with = "null_as_default")]
    pub blink_rate: f64,
    /// Beats per minute, absent until the engine has a stable estimate
    pub pulse_rate: Option<f64>,
    /// Breaths per minute
    pub breathing_rate: Option<f64>,
    /// Meaningful only when `has_gaze` is set
    #[serde(deserialize_with = "null_as_default")]
    pub gaze_x: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub gaze_y: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub has_gaze: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Engines send `null` for values they could not measure this frame.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Coarse classification of an engine-reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Usage credits or quota exhausted; retrying will not help.
    UsageExhausted,
    /// The credential was rejected.
    InvalidCredential,
    /// Anything else, usually a transient detection hiccup.
    Other,
}

/// Error reported by the engine through an `error` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineError {
    pub message: String,
    /// Structured code, when the engine provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Classify the error.
    ///
    /// A structured `code` wins. Without one, the message text is matched
    /// against known substrings; engines that predate error codes only
    /// report this way.
    pub fn kind(&self) -> EngineErrorKind {
        if let Some(code) = self.code.as_deref() {
            match code {
                "usage_exhausted" | "quota_exceeded" => return EngineErrorKind::UsageExhausted,
                "invalid_credential" | "unauthorized" => return EngineErrorKind::InvalidCredential,
                _ => {}
            }
        }

        let message = self.message.to_lowercase();
        if ["credit", "quota", "usage limit", "usage exhausted"]
            .iter()
            .any(|needle| message.contains(needle))
        {
            EngineErrorKind::UsageExhausted
        } else if ["api key", "unauthorized", "invalid key", "authentication"]
            .iter()
            .any(|needle| message.contains(needle))
        {
            EngineErrorKind::InvalidCredential
        } else {
            EngineErrorKind::Other
        }
    }

    /// Whether the caller should give up on this session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self.kind(), EngineErrorKind::Other)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// A decoded event record with a recognized type tag.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Ready,
    Status(String),
    Focus(FocusReading),
    Metrics(Value),
    Edge(Value),
    Error(EngineError),
}

impl EngineEvent {
    /// Wire tag of this event.
    pub fn tag(&self) -> &'static str {
        match self {
            EngineEvent::Ready => "ready",
            EngineEvent::Status(_) => "status",
            EngineEvent::Focus(_) => "focus",
            EngineEvent::Metrics(_) => "metrics",
            EngineEvent::Edge(_) => "edge",
            EngineEvent::Error(_) => "error",
        }
    }
}

/// Envelope of every line on the wire.
#[derive(Debug, Deserialize)]
pub(crate) struct RawRecord {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

/// Result of interpreting a [`RawRecord`].
pub(crate) enum Interpreted {
    Known(EngineEvent),
    Unrecognized(String),
}

impl RawRecord {
    pub(crate) fn interpret(self) -> Result<Interpreted, serde_json::Error> {
        let event = match self.kind.as_str() {
            "ready" => EngineEvent::Ready,
            "status" => EngineEvent::Status(text_field(&self.data, &["status", "message"])),
            "focus" => EngineEvent::Focus(serde_json::from_value(self.data)?),
            "metrics" => EngineEvent::Metrics(self.data),
            "edge" => EngineEvent::Edge(self.data),
            "error" => EngineEvent::Error(EngineError {
                message: text_field(&self.data, &["message", "error"]),
                code: self
                    .data
                    .get("code")
                    .and_then(|c| c.as_str())
                    .map(|c| c.to_string()),
            }),
            _ => return Ok(Interpreted::Unrecognized(self.kind)),
        };
        Ok(Interpreted::Known(event))
    }
}

/// First string field found under `keys`; a bare string payload is taken as-is.
fn text_field(data: &Value, keys: &[&str]) -> String {
    if let Some(s) = data.as_str() {
        return s.to_string();
    }
    keys.iter()
        .find_map(|key| data.get(*key).and_then(|v| v.as_str()))
        .unwrap_or_default()
        .to_string()
}
