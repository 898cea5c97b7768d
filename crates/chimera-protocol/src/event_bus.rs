//! Structured event bus message definitions.
//!
//! All event kinds and their payload schemas are defined here for use by the
//! orchestration core and by any transport that sits in front of it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Event Kind
// ============================================================================

/// Closed set of event kinds, following the format `<category>.<action>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "detection.result")]
    DetectionResult,
    #[serde(rename = "reasoning.action")]
    ReasoningAction,
    #[serde(rename = "speech.complete")]
    SpeechComplete,
    #[serde(rename = "action.complete")]
    ActionComplete,
    #[serde(rename = "action.error")]
    ActionError,
    #[serde(rename = "module.state_changed")]
    ModuleStateChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::DetectionResult,
        EventKind::ReasoningAction,
        EventKind::SpeechComplete,
        EventKind::ActionComplete,
        EventKind::ActionError,
        EventKind::ModuleStateChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::DetectionResult => "detection.result",
            EventKind::ReasoningAction => "reasoning.action",
            EventKind::SpeechComplete => "speech.complete",
            EventKind::ActionComplete => "action.complete",
            EventKind::ActionError => "action.error",
            EventKind::ModuleStateChanged => "module.state_changed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| PayloadError::UnknownKind(s.to_string()))
    }
}

// ============================================================================
// Payload Errors
// ============================================================================

/// Reasons an event or event request is rejected at construction time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PayloadError {
    #[error("unknown event type '{0}'")]
    UnknownKind(String),

    #[error("source_module must be a non-empty string")]
    EmptySource,

    #[error("payload does not match the '{kind}' schema: {reason}")]
    Schema { kind: EventKind, reason: String },

    #[error("confidence must be within [0, 1], got {0}")]
    ConfidenceOutOfRange(f64),

    #[error("bounding box dimensions must be non-negative")]
    NegativeBoundingBox,

    #[error("reasoning action text must not be empty")]
    EmptyText,

    #[error("module_id must be a non-empty string")]
    EmptyModuleId,

    #[error("error type '{0}' cannot be published as an event")]
    UnpublishableErrorType(ErrorType),
}

// ============================================================================
// Payload Schemas
// ============================================================================

/// Pixel-space rectangle around a detected object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Payload of `detection.result`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detected: bool,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
}

impl DetectionResult {
    /// The "nothing detected" result published for degraded inputs.
    pub fn nothing() -> Self {
        Self {
            detected: false,
            confidence: 0.0,
            object_type: None,
            bounding_box: None,
        }
    }

    fn validate(&self) -> Result<(), PayloadError> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(PayloadError::ConfidenceOutOfRange(self.confidence));
        }
        if let Some(bbox) = &self.bounding_box {
            if bbox.width < 0 || bbox.height < 0 {
                return Err(PayloadError::NegativeBoundingBox);
            }
        }
        Ok(())
    }
}

/// Payload of `reasoning.action`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningAction {
    pub text: String,
    /// Utterance for the voice output module, `null` when nothing should be said.
    #[serde(default)]
    pub speak: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_url: Option<String>,
}

impl ReasoningAction {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            speak: None,
            open_url: None,
        }
    }

    pub fn with_speak(mut self, speak: impl Into<String>) -> Self {
        self.speak = Some(speak.into());
        self
    }

    pub fn with_open_url(mut self, url: impl Into<String>) -> Self {
        self.open_url = Some(url.into());
        self
    }

    fn validate(&self) -> Result<(), PayloadError> {
        if self.text.trim().is_empty() {
            return Err(PayloadError::EmptyText);
        }
        Ok(())
    }
}

/// Error taxonomy shared by bus events and caller-facing failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Malformed caller input
    Validation,
    /// Internal capability failure
    Processing,
    /// A wrapped remote capability failed
    ExternalService,
    /// Reference to a module id the registry does not know; never published
    UnknownModule,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Validation => "validation",
            ErrorType::Processing => "processing",
            ErrorType::ExternalService => "external_service",
            ErrorType::UnknownModule => "unknown_module",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `action.error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionError {
    pub error_type: ErrorType,
    pub message: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    pub recoverable: bool,
}

impl ActionError {
    /// A recoverable error with no details attached.
    pub fn recoverable(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            details: Map::new(),
            recoverable: true,
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    fn validate(&self) -> Result<(), PayloadError> {
        if self.error_type == ErrorType::UnknownModule {
            return Err(PayloadError::UnpublishableErrorType(self.error_type));
        }
        Ok(())
    }
}

/// Payload of `speech.complete` and `action.complete`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    #[serde(default)]
    pub details: Map<String, Value>,
}

/// Payload of `module.state_changed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStateChanged {
    pub module_id: String,
    pub enabled: bool,
}

// ============================================================================
// Tagged Payload Union
// ============================================================================

/// Event payload keyed by event type.
///
/// Serialized with `#[serde(tag = "type", content = "payload")]`, producing
/// JSON like: `{"type": "detection.result", "payload": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventPayload {
    #[serde(rename = "detection.result")]
    DetectionResult(DetectionResult),
    #[serde(rename = "reasoning.action")]
    ReasoningAction(ReasoningAction),
    #[serde(rename = "speech.complete")]
    SpeechComplete(Completion),
    #[serde(rename = "action.complete")]
    ActionComplete(Completion),
    #[serde(rename = "action.error")]
    ActionError(ActionError),
    #[serde(rename = "module.state_changed")]
    ModuleStateChanged(ModuleStateChanged),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::DetectionResult(_) => EventKind::DetectionResult,
            EventPayload::ReasoningAction(_) => EventKind::ReasoningAction,
            EventPayload::SpeechComplete(_) => EventKind::SpeechComplete,
            EventPayload::ActionComplete(_) => EventKind::ActionComplete,
            EventPayload::ActionError(_) => EventKind::ActionError,
            EventPayload::ModuleStateChanged(_) => EventKind::ModuleStateChanged,
        }
    }

    /// Check the per-kind invariants that serde alone cannot express.
    pub fn validate(&self) -> Result<(), PayloadError> {
        match self {
            EventPayload::DetectionResult(data) => data.validate(),
            EventPayload::ReasoningAction(data) => data.validate(),
            EventPayload::ActionError(data) => data.validate(),
            EventPayload::ModuleStateChanged(data) if data.module_id.trim().is_empty() => {
                Err(PayloadError::EmptyModuleId)
            }
            _ => Ok(()),
        }
    }

    /// Payload fields as a JSON object, without the type tag.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut tagged| tagged.get_mut("payload").map(Value::take))
            .unwrap_or(Value::Null)
    }
}

// ============================================================================
// Event
// ============================================================================

/// Immutable record of something a module did or observed.
///
/// Fields are private so that every `Event` in existence went through
/// payload validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEvent")]
pub struct Event {
    id: Uuid,
    source_module: String,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    payload: EventPayload,
}

/// Wire shape of an [`Event`] before validation
#[derive(Deserialize)]
struct RawEvent {
    id: Uuid,
    source_module: String,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    payload: EventPayload,
}

impl TryFrom<RawEvent> for Event {
    type Error = PayloadError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        if raw.source_module.trim().is_empty() {
            return Err(PayloadError::EmptySource);
        }
        raw.payload.validate()?;

        Ok(Self {
            id: raw.id,
            source_module: raw.source_module,
            timestamp: raw.timestamp,
            payload: raw.payload,
        })
    }
}

impl Event {
    /// Create a new event with a fresh id and the current UTC time.
    pub fn new(source_module: impl Into<String>, payload: EventPayload) -> Result<Self, PayloadError> {
        let source_module = source_module.into();
        if source_module.trim().is_empty() {
            return Err(PayloadError::EmptySource);
        }
        payload.validate()?;

        Ok(Self {
            id: Uuid::new_v4(),
            source_module,
            timestamp: Utc::now(),
            payload,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source_module(&self) -> &str {
        &self.source_module
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }
}

/// Untyped publish request as a transport receives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRequest {
    pub source_module: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl TryFrom<EventRequest> for Event {
    type Error = PayloadError;

    fn try_from(request: EventRequest) -> Result<Self, Self::Error> {
        let kind: EventKind = request.kind.parse()?;
        let payload = match request.payload {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let tagged = serde_json::json!({ "type": kind.as_str(), "payload": payload });
        let payload: EventPayload =
            serde_json::from_value(tagged).map_err(|e| PayloadError::Schema {
                kind,
                reason: e.to_string(),
            })?;

        Event::new(request.source_module, payload)
    }
}

// ============================================================================
// Tests
// ============================================================================
