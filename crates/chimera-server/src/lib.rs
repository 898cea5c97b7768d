//! Chimera orchestration core.
//!
//! An in-memory event bus, a registry of toggleable modules, and the Eye and
//! Brain modules that turn capability output into bus events.

pub mod config;
pub mod console;
pub mod control;
pub mod detector;
pub mod error;
pub mod event_bus;
pub mod modules;
pub mod reasoner;
pub mod registry;

pub use control::ControlPlane;
pub use error::{ChimeraError, Result};
pub use event_bus::{EventBus, EventFeed, Subscriber};
pub use registry::ModuleRegistry;
