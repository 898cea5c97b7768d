//! Brain: reacts to events of interest with a `reasoning.action`.
//!
//! Exactly one reasoning call per triggering event, no retries. A failed call
//! is answered with an `external_service` error and a fallback action.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chimera_protocol::{ActionError, ErrorType, Event, EventKind, EventPayload, ReasoningAction};
use tracing::{debug, error, info, warn};

use super::BRAIN;
use crate::event_bus::{EventBus, Subscriber};
use crate::reasoner::{ReasonError, Reasoner, Reasoning, ReasoningContext};
use crate::registry::ModuleRegistry;

/// Published when the reasoning service cannot be reached
pub const FALLBACK_TEXT: &str =
    "My vision is clouded and I am having difficulties thinking right now. Please try again in a moment.";

/// What happened to one inbound event
#[derive(Debug)]
pub enum ReasoningOutcome {
    /// Module disabled, kind not of interest, or the Brain's own event
    Ignored,
    /// Reasoning succeeded and its action was published
    Answered(ReasoningAction),
    /// Reasoning failed; an error event and the fallback action were published
    Fallback(ReasonError),
}

pub struct BrainModule {
    bus: Arc<EventBus>,
    registry: Arc<ModuleRegistry>,
    reasoner: Arc<dyn Reasoner>,
    interests: HashSet<EventKind>,
}

impl BrainModule {
    /// A Brain interested in `detection.result` events
    pub fn new(bus: Arc<EventBus>, registry: Arc<ModuleRegistry>, reasoner: Arc<dyn Reasoner>) -> Self {
        Self {
            bus,
            registry,
            reasoner,
            interests: HashSet::from([EventKind::DetectionResult]),
        }
    }

    pub fn with_interests(mut self, interests: impl IntoIterator<Item = EventKind>) -> Self {
        self.interests = interests.into_iter().collect();
        self
    }

    pub fn interests(&self) -> &HashSet<EventKind> {
        &self.interests
    }

    /// Subscribe to the bus.
    pub fn start(self: Arc<Self>) {
        info!(
            interests = ?self.interests.iter().map(EventKind::as_str).collect::<Vec<_>>(),
            "brain module started"
        );
        let bus = self.bus.clone();
        bus.subscribe(BRAIN, self);
    }

    pub async fn handle_event(&self, event: &Event) -> ReasoningOutcome {
        // Never a trigger for itself, whatever the interests
        if event.source_module() == BRAIN || !self.interests.contains(&event.kind()) {
            return ReasoningOutcome::Ignored;
        }
        if !self.registry.is_enabled(BRAIN) {
            debug!(event_id = %event.id(), "brain disabled, event ignored");
            return ReasoningOutcome::Ignored;
        }

        let ctx = ReasoningContext::from_event(event);
        let reasoning = self
            .reasoner
            .reason(&ctx)
            .await
            .and_then(|reasoning| {
                if reasoning.text.trim().is_empty() {
                    Err(ReasonError::MalformedResponse("reasoning returned empty text".to_string()))
                } else {
                    Ok(reasoning)
                }
            });

        match reasoning {
            Ok(reasoning) => {
                let action = to_action(reasoning);
                debug!(trigger_event_id = %event.id(), text = %action.text, "reasoning complete");
                self.emit(EventPayload::ReasoningAction(action.clone())).await;
                ReasoningOutcome::Answered(action)
            }
            Err(e) => {
                warn!(
                    trigger_event_id = %event.id(),
                    failure = e.classification(),
                    error = %e,
                    "reasoning failed, publishing fallback"
                );

                let error = ActionError::recoverable(
                    ErrorType::ExternalService,
                    format!("Reasoning service call failed: {}", e),
                )
                .with_detail("trigger_event_id", event.id().to_string())
                .with_detail("failure", e.classification());
                self.emit(EventPayload::ActionError(error)).await;
                self.emit(EventPayload::ReasoningAction(ReasoningAction::new(FALLBACK_TEXT)))
                    .await;

                ReasoningOutcome::Fallback(e)
            }
        }
    }

    async fn emit(&self, payload: EventPayload) {
        match Event::new(BRAIN, payload) {
            Ok(event) => {
                self.bus.publish(event).await;
            }
            Err(e) => error!(error = %e, "brain produced an invalid event"),
        }
    }
}

fn to_action(reasoning: Reasoning) -> ReasoningAction {
    ReasoningAction {
        text: reasoning.text,
        speak: reasoning.speak,
        open_url: reasoning.open_url,
    }
}

#[async_trait]
impl Subscriber for BrainModule {
    async fn on_event(&self, event: Arc<Event>) -> anyhow::Result<()> {
        self.handle_event(&event).await;
        Ok(())
    }
}
