//! Module registry: static metadata plus one enabled flag per module.
//!
//! Toggling only flips the flag. Announcing the change on the bus is the
//! caller's job (see [`crate::control::ControlPlane::toggle_module`]).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use chimera_protocol::ModuleRecord;

use crate::error::{ChimeraError, Result};

/// Static description of a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
}

impl ModuleDefinition {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        capabilities: &[&str],
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// The modules every chimera process knows about
pub fn default_catalogue() -> Vec<ModuleDefinition> {
    vec![
        ModuleDefinition::new(
            "eye",
            "Eye Module",
            "Vision module that detects faces or objects from webcam input",
            &["face_detection", "object_detection", "vision_processing"],
        ),
        ModuleDefinition::new(
            "brain",
            "Brain Module",
            "Reasoning module that interprets events and plans responses using LLM",
            &["llm_reasoning", "context_analysis", "action_planning"],
        ),
        ModuleDefinition::new(
            "mouth",
            "Mouth Module",
            "Voice output module that converts text to speech",
            &["text_to_speech", "voice_output"],
        ),
        ModuleDefinition::new(
            "ear",
            "Ear Module",
            "Voice input module that listens to microphone and converts speech to text",
            &["speech_recognition", "voice_input", "audio_processing"],
        ),
    ]
}

struct Entry {
    definition: ModuleDefinition,
    enabled: AtomicBool,
}

impl Entry {
    fn record(&self) -> ModuleRecord {
        ModuleRecord {
            id: self.definition.id.clone(),
            name: self.definition.name.clone(),
            description: self.definition.description.clone(),
            enabled: self.enabled.load(Ordering::Acquire),
            capabilities: self.definition.capabilities.clone(),
        }
    }
}

/// Module registry (in-memory)
///
/// The set of modules is fixed at construction, so lookups need no lock.
/// Every module starts disabled.
pub struct ModuleRegistry {
    entries: Vec<Entry>,
}

impl ModuleRegistry {
    /// Build a registry from an ordered list of definitions.
    /// Enumeration order follows the input; duplicate ids are rejected.
    pub fn new(definitions: Vec<ModuleDefinition>) -> Result<Self> {
        let mut seen = HashSet::new();
        for definition in &definitions {
            if !seen.insert(definition.id.as_str()) {
                return Err(ChimeraError::DuplicateModule(definition.id.clone()));
            }
        }

        let entries = definitions
            .into_iter()
            .map(|definition| Entry {
                definition,
                enabled: AtomicBool::new(false),
            })
            .collect();

        Ok(Self { entries })
    }

    fn entry(&self, id: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.definition.id == id)
    }

    pub fn get_module(&self, id: &str) -> Option<ModuleRecord> {
        self.entry(id).map(Entry::record)
    }

    pub fn get_all_modules(&self) -> Vec<ModuleRecord> {
        self.entries.iter().map(Entry::record).collect()
    }

    /// Flip the enabled flag. Returns the updated record, `None` for unknown ids.
    pub fn toggle_module(&self, id: &str) -> Option<ModuleRecord> {
        let entry = self.entry(id)?;
        let previous = entry.enabled.fetch_xor(true, Ordering::AcqRel);

        tracing::info!(module_id = %id, enabled = !previous, "module toggled");

        let mut record = entry.record();
        record.enabled = !previous;
        Some(record)
    }

    /// `false` for unknown ids
    pub fn is_enabled(&self, id: &str) -> bool {
        self.entry(id)
            .map(|e| e.enabled.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self {
            entries: default_catalogue()
                .into_iter()
                .map(|definition| Entry {
                    definition,
                    enabled: AtomicBool::new(false),
                })
                .collect(),
        }
    }
}
