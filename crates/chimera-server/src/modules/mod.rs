//! Orchestration modules.
//!
//! Each module wraps one capability, is gated by its registry flag and talks
//! to the rest of the system only through the event bus.

pub mod brain;
pub mod debounce;
pub mod eye;

pub use brain::{BrainModule, ReasoningOutcome, FALLBACK_TEXT};
pub use debounce::Debounce;
pub use eye::{DetectionOutcome, EyeModule};

/// Registry id of the vision module
pub const EYE: &str = "eye";
/// Registry id of the reasoning module
pub const BRAIN: &str = "brain";
/// Source of events emitted by the control plane itself
pub const SYSTEM_SOURCE: &str = "system";
