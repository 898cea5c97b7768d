//! Reasoning capability wrapped by the Brain module.

mod openai;

pub use openai::OpenAiReasoner;

use std::time::Duration;

use async_trait::async_trait;
use chimera_protocol::{Event, EventKind};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Context for one reasoning call, built from the triggering event
#[derive(Debug, Clone)]
pub struct ReasoningContext {
    pub trigger_event_id: Uuid,
    pub source_module: String,
    pub kind: EventKind,
    pub payload: Value,
}

impl ReasoningContext {
    pub fn from_event(event: &Event) -> Self {
        Self {
            trigger_event_id: event.id(),
            source_module: event.source_module().to_string(),
            kind: event.kind(),
            payload: event.payload().to_value(),
        }
    }
}

/// What the reasoning capability decided
#[derive(Debug, Clone, PartialEq)]
pub struct Reasoning {
    pub text: String,
    pub speak: Option<String>,
    pub open_url: Option<String>,
}

impl Reasoning {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            speak: None,
            open_url: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ReasonError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ReasonError {
    /// Coarse failure class reported in error event details
    pub fn classification(&self) -> &'static str {
        match self {
            ReasonError::Timeout(_) => "timeout",
            ReasonError::Transport(_) => "transport",
            ReasonError::MalformedResponse(_) => "malformed_response",
        }
    }
}

/// Reasoning capability
///
/// Implementations own their timeout and retry policy.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason(&self, ctx: &ReasoningContext) -> Result<Reasoning, ReasonError>;
}
