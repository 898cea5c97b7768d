//! Eye: turns webcam frames into `detection.result` events.
//!
//! Every accepted frame yields a detection event unless the debounce filter
//! suppresses a redundant successful result. Failures publish an
//! `action.error` followed by a "nothing detected" result.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chimera_protocol::{ActionError, DetectionResult, ErrorType, Event, EventPayload};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::debounce::Debounce;
use super::EYE;
use crate::config::EyeConfig;
use crate::detector::{DetectError, Detection, Detector};
use crate::event_bus::{EventBus, Subscriber};
use crate::registry::ModuleRegistry;

/// What happened to one frame
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    /// Module disabled, frame dropped
    Disabled,
    /// Result published
    Published(DetectionResult),
    /// Result identical to the last publication within the interval
    Suppressed(DetectionResult),
    /// An error event and a "nothing detected" result were published
    Degraded(ErrorType),
}

struct Failure {
    error: ActionError,
}

impl Failure {
    fn new(error_type: ErrorType, message: &str) -> Self {
        Self {
            error: ActionError::recoverable(error_type, message),
        }
    }

    fn detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.error = self.error.with_detail(key, value);
        self
    }
}

pub struct EyeModule {
    bus: Arc<EventBus>,
    registry: Arc<ModuleRegistry>,
    detector: Arc<dyn Detector>,
    debounce: Mutex<Debounce>,
    /// Held from the debounce decision until the event is in the log, so the
    /// log order of detection results matches the recorded order.
    publish_gate: tokio::sync::Mutex<()>,
}

impl EyeModule {
    pub fn new(
        bus: Arc<EventBus>,
        registry: Arc<ModuleRegistry>,
        detector: impl Detector,
        config: &EyeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            registry,
            detector: Arc::new(detector),
            debounce: Mutex::new(Debounce::new(config.min_publish_interval())),
            publish_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// Subscribe to the bus so the Eye can follow its own state changes.
    pub fn start(self: &Arc<Self>) {
        self.bus.subscribe(EYE, self.clone());
        tracing::info!(
            interval_ms = self.debounce().interval().as_millis() as u64,
            "eye module started"
        );
    }

    fn debounce(&self) -> std::sync::MutexGuard<'_, Debounce> {
        self.debounce.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Detected state of the last published result, `None` before the first one
    pub fn last_state(&self) -> Option<bool> {
        self.debounce().last_state()
    }

    /// Process one base64 frame, optionally prefixed with a data URL header.
    pub async fn process_frame(&self, frame: &str) -> DetectionOutcome {
        if !self.registry.is_enabled(EYE) {
            debug!("eye disabled, frame dropped");
            return DetectionOutcome::Disabled;
        }

        let detection = match self.detect(frame).await {
            Ok(detection) => detection,
            Err(failure) => return self.degrade(failure).await,
        };

        let result = detection_result(detection);
        let _gate = self.publish_gate.lock().await;
        let publish = {
            let mut debounce = self.debounce();
            let now = Instant::now();
            if debounce.should_publish(result.detected, now) {
                debounce.record(result.detected, now);
                true
            } else {
                false
            }
        };

        if !publish {
            debug!(detected = result.detected, "detection suppressed by debounce");
            return DetectionOutcome::Suppressed(result);
        }

        self.emit(EventPayload::DetectionResult(result.clone())).await;
        DetectionOutcome::Published(result)
    }

    async fn detect(&self, frame: &str) -> Result<Option<Detection>, Failure> {
        let encoded = strip_data_url(frame);
        let image = STANDARD.decode(encoded.trim()).map_err(|e| {
            Failure::new(ErrorType::Validation, "Invalid base64 frame data")
                .detail("frame_length", frame.len())
                .detail("error", e.to_string())
        })?;

        let detector = self.detector.clone();
        let detection = tokio::task::spawn_blocking(move || detector.detect(&image))
            .await
            .map_err(|e| {
                Failure::new(ErrorType::Processing, "Detection task failed")
                    .detail("error", e.to_string())
            })?;

        match detection {
            Ok(Some(d)) if !d.confidence.is_finite() => Err(Failure::new(
                ErrorType::Processing,
                "Detector returned an invalid result",
            )
            .detail("error", format!("non-finite confidence {}", d.confidence))),
            Ok(Some(d)) if d.bounding_box.is_some_and(|b| b.width < 0 || b.height < 0) => Err(
                Failure::new(ErrorType::Processing, "Detector returned an invalid result")
                    .detail("error", "negative bounding box"),
            ),
            Ok(detection) => Ok(detection),
            Err(DetectError::Decode(e)) => {
                Err(Failure::new(ErrorType::Processing, "Failed to decode image data").detail("error", e))
            }
            Err(DetectError::Internal(e)) => {
                Err(Failure::new(ErrorType::Processing, "Detection failed").detail("error", e))
            }
        }
    }

    /// Publish the error followed by a "nothing detected" result.
    /// Bypasses debounce; the failure still becomes the remembered state.
    async fn degrade(&self, failure: Failure) -> DetectionOutcome {
        let error_type = failure.error.error_type;
        warn!(
            error_type = %error_type,
            message = %failure.error.message,
            "frame processing degraded"
        );

        let _gate = self.publish_gate.lock().await;
        self.emit(EventPayload::ActionError(failure.error)).await;

        self.debounce().record(false, Instant::now());
        self.emit(EventPayload::DetectionResult(DetectionResult::nothing()))
            .await;

        DetectionOutcome::Degraded(error_type)
    }

    async fn emit(&self, payload: EventPayload) {
        match Event::new(EYE, payload) {
            Ok(event) => {
                self.bus.publish(event).await;
            }
            Err(e) => error!(error = %e, "eye produced an invalid event"),
        }
    }
}

#[async_trait]
impl Subscriber for EyeModule {
    async fn on_event(&self, event: Arc<Event>) -> anyhow::Result<()> {
        if let EventPayload::ModuleStateChanged(change) = event.payload() {
            if change.module_id == EYE && !change.enabled {
                self.debounce().reset();
                debug!("eye disabled, debounce state reset");
            }
        }
        Ok(())
    }
}

fn strip_data_url(frame: &str) -> &str {
    match frame.split_once(',') {
        Some((header, data)) if header.starts_with("data:") => data,
        _ => frame,
    }
}

fn detection_result(detection: Option<Detection>) -> DetectionResult {
    let Some(detection) = detection else {
        return DetectionResult::nothing();
    };

    let confidence = detection.confidence.clamp(0.0, 1.0);
    if confidence == 0.0 {
        return DetectionResult::nothing();
    }

    DetectionResult {
        detected: true,
        confidence,
        object_type: Some("face".to_string()),
        bounding_box: detection.bounding_box,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use chimera_protocol::{BoundingBox, EventKind, ModuleStateChanged};
    use std::time::Duration;

    fn face(confidence: f64) -> impl Detector {
        move |_: &[u8]| -> Result<Option<Detection>, DetectError> {
            Ok(Some(Detection {
                confidence,
                bounding_box: Some(BoundingBox { x: 1, y: 2, width: 30, height: 40 }),
            }))
        }
    }

    fn setup(detector: impl Detector, interval_ms: u64) -> (Arc<EventBus>, Arc<ModuleRegistry>, Arc<EyeModule>) {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ModuleRegistry::default());
        let config = EyeConfig { min_publish_interval_ms: interval_ms };
        let eye = EyeModule::new(bus.clone(), registry.clone(), detector, &config);
        (bus, registry, eye)
    }

    fn frame() -> String {
        STANDARD.encode(b"jpeg bytes")
    }

    fn kinds(bus: &EventBus) -> Vec<EventKind> {
        bus.get_all_events().iter().map(|e| e.kind()).collect()
    }

    #[tokio::test]
    async fn test_disabled_drops_frame() {
        let (bus, _registry, eye) = setup(face(0.9), 5000);

        assert_eq!(eye.process_frame(&frame()).await, DetectionOutcome::Disabled);
        assert_eq!(eye.process_frame("%%% not base64").await, DetectionOutcome::Disabled);
        assert!(bus.is_empty());
    }

    #[tokio::test]
    async fn test_face_detected() {
        let (bus, registry, eye) = setup(face(0.87), 5000);
        registry.toggle_module(EYE);

        let outcome = eye.process_frame(&format!("data:image/jpeg;base64,{}", frame())).await;
        let DetectionOutcome::Published(result) = outcome else {
            panic!("expected a published result, got {:?}", outcome);
        };
        assert!(result.detected);
        assert_eq!(result.confidence, 0.87);
        assert_eq!(result.object_type.as_deref(), Some("face"));

        let events = bus.get_all_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source_module(), EYE);
        assert_eq!(events[0].payload(), &EventPayload::DetectionResult(result));
    }

    #[tokio::test]
    async fn test_invalid_base64_degrades_with_validation_error() {
        let (bus, registry, eye) = setup(face(0.9), 5000);
        registry.toggle_module(EYE);

        let outcome = eye.process_frame("data:image/jpeg;base64,@@not-base64@@").await;
        assert_eq!(outcome, DetectionOutcome::Degraded(ErrorType::Validation));

        let events = bus.get_all_events();
        assert_eq!(kinds(&bus), vec![EventKind::ActionError, EventKind::DetectionResult]);
        let EventPayload::ActionError(error) = events[0].payload() else {
            panic!("expected an error payload");
        };
        assert_eq!(error.error_type, ErrorType::Validation);
        assert!(error.recoverable);
        assert!(error.details.contains_key("frame_length"));
        assert_eq!(
            events[1].payload(),
            &EventPayload::DetectionResult(DetectionResult::nothing())
        );
    }

    #[tokio::test]
    async fn test_undecodable_image_degrades_with_processing_error() {
        let detector = |_: &[u8]| -> Result<Option<Detection>, DetectError> {
            Err(DetectError::Decode("unknown image format".into()))
        };
        let (bus, registry, eye) = setup(detector, 5000);
        registry.toggle_module(EYE);

        let outcome = eye.process_frame(&frame()).await;
        assert_eq!(outcome, DetectionOutcome::Degraded(ErrorType::Processing));

        let events = bus.get_all_events();
        let EventPayload::ActionError(error) = events[0].payload() else {
            panic!("expected an error payload");
        };
        assert_eq!(error.message, "Failed to decode image data");
        assert_eq!(kinds(&bus), vec![EventKind::ActionError, EventKind::DetectionResult]);
    }

    #[tokio::test]
    async fn test_panicking_detector_degrades() {
        let detector = |_: &[u8]| -> Result<Option<Detection>, DetectError> { panic!("model crashed") };
        let (bus, registry, eye) = setup(detector, 5000);
        registry.toggle_module(EYE);

        let outcome = eye.process_frame(&frame()).await;
        assert_eq!(outcome, DetectionOutcome::Degraded(ErrorType::Processing));
        assert_eq!(kinds(&bus), vec![EventKind::ActionError, EventKind::DetectionResult]);
    }

    #[tokio::test]
    async fn test_failures_bypass_debounce() {
        let (bus, registry, eye) = setup(face(0.9), 60_000);
        registry.toggle_module(EYE);

        eye.process_frame("!!!").await;
        eye.process_frame("!!!").await;

        assert_eq!(bus.len(), 4);
    }

    #[tokio::test]
    async fn test_zero_confidence_counts_as_not_detected() {
        let (bus, registry, eye) = setup(face(0.0), 5000);
        registry.toggle_module(EYE);

        let outcome = eye.process_frame(&frame()).await;
        assert_eq!(outcome, DetectionOutcome::Published(DetectionResult::nothing()));
        assert_eq!(bus.len(), 1);
    }

    #[tokio::test]
    async fn test_confidence_is_clamped() {
        let (_bus, registry, eye) = setup(face(1.7), 5000);
        registry.toggle_module(EYE);

        let DetectionOutcome::Published(result) = eye.process_frame(&frame()).await else {
            panic!("expected a published result");
        };
        assert_eq!(result.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_identical_results_debounced() {
        let (bus, registry, eye) = setup(face(0.9), 60_000);
        registry.toggle_module(EYE);

        assert!(matches!(eye.process_frame(&frame()).await, DetectionOutcome::Published(_)));
        assert!(matches!(eye.process_frame(&frame()).await, DetectionOutcome::Suppressed(_)));
        assert!(matches!(eye.process_frame(&frame()).await, DetectionOutcome::Suppressed(_)));
        assert_eq!(bus.len(), 1);
    }

    #[tokio::test]
    async fn test_identical_results_republished_after_interval() {
        let (bus, registry, eye) = setup(face(0.9), 20);
        registry.toggle_module(EYE);

        eye.process_frame(&frame()).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        eye.process_frame(&frame()).await;

        assert_eq!(bus.len(), 2);
    }

    #[tokio::test]
    async fn test_transitions_publish_immediately() {
        let present = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag = present.clone();
        let detector = move |_: &[u8]| -> Result<Option<Detection>, DetectError> {
            // Alternate between a face and an empty frame
            let now = flag.fetch_xor(true, std::sync::atomic::Ordering::SeqCst);
            Ok(now.then_some(Detection { confidence: 0.9, bounding_box: None }))
        };
        let (bus, registry, eye) = setup(detector, 60_000);
        registry.toggle_module(EYE);

        for _ in 0..4 {
            assert!(matches!(eye.process_frame(&frame()).await, DetectionOutcome::Published(_)));
        }

        let detected: Vec<_> = bus
            .get_all_events()
            .iter()
            .map(|e| match e.payload() {
                EventPayload::DetectionResult(r) => r.detected,
                other => panic!("unexpected payload {:?}", other),
            })
            .collect();
        assert_eq!(detected, vec![true, false, true, false]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_frames_keep_log_and_debounce_in_step() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let detector = move |_: &[u8]| -> Result<Option<Detection>, DetectError> {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok((n % 2 == 0).then_some(Detection { confidence: 0.9, bounding_box: None }))
        };
        let (bus, registry, eye) = setup(detector, 60_000);
        registry.toggle_module(EYE);

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let eye = eye.clone();
                tokio::spawn(async move { eye.process_frame(&frame()).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let detected: Vec<bool> = bus
            .get_all_events()
            .iter()
            .map(|e| match e.payload() {
                EventPayload::DetectionResult(r) => r.detected,
                other => panic!("unexpected payload {:?}", other),
            })
            .collect();
        assert!(!detected.is_empty());
        // Within the interval only transitions publish
        assert!(detected.windows(2).all(|pair| pair[0] != pair[1]), "{:?}", detected);
        assert_eq!(eye.last_state(), detected.last().copied());
    }

    #[tokio::test]
    async fn test_disable_resets_debounce() {
        let (bus, registry, eye) = setup(face(0.9), 60_000);
        eye.start();
        registry.toggle_module(EYE);

        eye.process_frame(&frame()).await;

        registry.toggle_module(EYE);
        let change = Event::new(
            "system",
            EventPayload::ModuleStateChanged(ModuleStateChanged {
                module_id: EYE.to_string(),
                enabled: false,
            }),
        )
        .unwrap();
        bus.publish(change).await;
        registry.toggle_module(EYE);

        assert!(matches!(eye.process_frame(&frame()).await, DetectionOutcome::Published(_)));
        assert_eq!(
            kinds(&bus),
            vec![
                EventKind::DetectionResult,
                EventKind::ModuleStateChanged,
                EventKind::DetectionResult
            ]
        );
    }

    #[test]
    fn test_strip_data_url() {
        assert_eq!(strip_data_url("data:image/png;base64,AAAA"), "AAAA");
        assert_eq!(strip_data_url("AAAA"), "AAAA");
    }
}
