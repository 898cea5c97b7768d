//! Shared protocol definitions for the chimera orchestration core and its transports.

pub mod event_bus;

use serde::{Deserialize, Serialize};

pub use event_bus::{
    ActionError, BoundingBox, Completion, DetectionResult, ErrorType, Event, EventKind,
    EventPayload, EventRequest, ModuleStateChanged, PayloadError, ReasoningAction,
};

// ============================================================================
// Module Records
// ============================================================================

/// Snapshot of one registry entry (for API responses)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub capabilities: Vec<String>,
}
