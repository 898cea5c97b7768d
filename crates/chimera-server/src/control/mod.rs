//! Operations a transport (console, HTTP, WebSocket) needs, on top of the
//! bus and registry.

use std::sync::Arc;

use chimera_protocol::{Event, EventPayload, EventRequest, ModuleRecord, ModuleStateChanged};

use crate::config::BusConfig;
use crate::error::{ChimeraError, Result};
use crate::event_bus::{EventBus, EventFeed};
use crate::modules::SYSTEM_SOURCE;
use crate::registry::ModuleRegistry;

#[derive(Clone)]
pub struct ControlPlane {
    bus: Arc<EventBus>,
    registry: Arc<ModuleRegistry>,
    default_limit: usize,
    max_limit: usize,
}

impl ControlPlane {
    pub fn new(bus: Arc<EventBus>, registry: Arc<ModuleRegistry>, config: &BusConfig) -> Self {
        Self {
            bus,
            registry,
            default_limit: config.default_query_limit,
            max_limit: config.max_query_limit,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Validate and publish an event on behalf of a transport client.
    pub async fn publish(&self, request: EventRequest) -> Result<Event> {
        let event = Event::try_from(request)?;
        let event = self.bus.publish(event).await;
        Ok(event.as_ref().clone())
    }

    pub fn list_modules(&self) -> Vec<ModuleRecord> {
        self.registry.get_all_modules()
    }

    /// Flip a module and announce the new state on the bus.
    pub async fn toggle_module(&self, module_id: &str) -> Result<ModuleRecord> {
        let record = self
            .registry
            .toggle_module(module_id)
            .ok_or_else(|| ChimeraError::UnknownModule(module_id.to_string()))?;

        let event = Event::new(
            SYSTEM_SOURCE,
            EventPayload::ModuleStateChanged(ModuleStateChanged {
                module_id: record.id.clone(),
                enabled: record.enabled,
            }),
        )?;
        self.bus.publish(event).await;

        Ok(record)
    }

    /// Enable a module unless it already is. Only a real change is announced.
    pub async fn enable_module(&self, module_id: &str) -> Result<ModuleRecord> {
        let record = self
            .registry
            .get_module(module_id)
            .ok_or_else(|| ChimeraError::UnknownModule(module_id.to_string()))?;
        if record.enabled {
            return Ok(record);
        }
        self.toggle_module(module_id).await
    }

    /// Last `limit` events, oldest first. `None` uses the configured default.
    pub fn recent_events(&self, limit: Option<usize>) -> Result<Vec<Arc<Event>>> {
        let limit = limit.unwrap_or(self.default_limit);
        if limit == 0 || limit > self.max_limit {
            return Err(ChimeraError::InvalidLimit {
                limit,
                max: self.max_limit,
            });
        }
        Ok(self.bus.get_recent_events(limit))
    }

    /// Feed of events published from now on
    pub fn feed(&self) -> EventFeed {
        self.bus.feed()
    }
}
