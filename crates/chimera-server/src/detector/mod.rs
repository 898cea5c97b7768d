//! Detection capability wrapped by the Eye module.
//!
//! Detectors are synchronous and may be CPU heavy; the Eye runs them on the
//! blocking pool.

use chimera_protocol::BoundingBox;
use serde::Deserialize;
use thiserror::Error;

/// One detected object
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub confidence: f64,
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Error, Debug)]
pub enum DetectError {
    /// The bytes are not something the detector can read
    #[error("failed to decode image data: {0}")]
    Decode(String),

    #[error("detector failure: {0}")]
    Internal(String),
}

/// Detection capability
///
/// Returns `Ok(None)` when nothing was found in the image.
pub trait Detector: Send + Sync + 'static {
    fn detect(&self, image: &[u8]) -> Result<Option<Detection>, DetectError>;
}

impl<F> Detector for F
where
    F: Fn(&[u8]) -> Result<Option<Detection>, DetectError> + Send + Sync + 'static,
{
    fn detect(&self, image: &[u8]) -> Result<Option<Detection>, DetectError> {
        self(image)
    }
}

// ============================================================================
// Report Detector
// ============================================================================

#[derive(Debug, Deserialize)]
struct DetectionReport {
    detected: bool,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    bounding_box: Option<BoundingBox>,
}

/// Detector for frames that already carry a detection made upstream
///
/// The frame body is a JSON report such as
/// `{"detected": true, "confidence": 0.92, "bounding_box": {"x": 10, "y": 20, "width": 64, "height": 64}}`.
/// A report with `detected: true` and no confidence counts as fully confident.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportDetector;

impl Detector for ReportDetector {
    fn detect(&self, image: &[u8]) -> Result<Option<Detection>, DetectError> {
        let report: DetectionReport =
            serde_json::from_slice(image).map_err(|e| DetectError::Decode(e.to_string()))?;

        if !report.detected {
            return Ok(None);
        }

        let confidence = report.confidence.unwrap_or(1.0);
        if !confidence.is_finite() {
            return Err(DetectError::Internal(format!(
                "report carries non-finite confidence {}",
                confidence
            )));
        }

        Ok(Some(Detection {
            confidence,
            bounding_box: report.bounding_box,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_detected() {
        let frame = br#"{"detected": true, "confidence": 0.92, "bounding_box": {"x": 10, "y": 20, "width": 64, "height": 48}}"#;
        let detection = ReportDetector.detect(frame).unwrap().unwrap();

        assert_eq!(detection.confidence, 0.92);
        assert_eq!(
            detection.bounding_box,
            Some(BoundingBox { x: 10, y: 20, width: 64, height: 48 })
        );
    }

    #[test]
    fn test_report_nothing_detected() {
        let frame = br#"{"detected": false, "confidence": 0.3}"#;
        assert!(ReportDetector.detect(frame).unwrap().is_none());
    }

    #[test]
    fn test_report_default_confidence() {
        let detection = ReportDetector.detect(br#"{"detected": true}"#).unwrap().unwrap();
        assert_eq!(detection.confidence, 1.0);
        assert!(detection.bounding_box.is_none());
    }

    #[test]
    fn test_report_not_json() {
        let result = ReportDetector.detect(&[0xff, 0xd8, 0xff, 0xe0]);
        assert!(matches!(result, Err(DetectError::Decode(_))));
    }

    #[test]
    fn test_closure_detector() {
        let detector = |_: &[u8]| -> Result<Option<Detection>, DetectError> {
            Err(DetectError::Internal("model not loaded".into()))
        };
        assert!(matches!(detector.detect(b"frame"), Err(DetectError::Internal(_))));
    }
}
