//! Detector collaborators and the dual-detector service.

use crate::bbox::BoundingBox;
use crate::fusion::{DetectionCandidate, DetectionFusion, DetectionSource, FusedDetections, FusionConfig};
use crate::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// One box reported by a detection model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl RawDetection {
    pub fn new(class_label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_label: class_label.into(),
            confidence,
            bbox,
        }
    }

    pub fn into_candidate(self, source: DetectionSource) -> DetectionCandidate {
        DetectionCandidate {
            class_label: self.class_label,
            confidence: self.confidence,
            bbox: self.bbox,
            source,
        }
    }
}

/// An object detection model.
///
/// Implementations return only boxes with `confidence >= confidence_threshold`.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &RgbImage, confidence_threshold: f32) -> Result<Vec<RawDetection>>;
}

/// Stand-in for an absent detector; never reports anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDetector;

impl Detector for NoDetector {
    fn detect(&self, _image: &RgbImage, _confidence_threshold: f32) -> Result<Vec<RawDetection>> {
        Ok(Vec::new())
    }
}

/// Vocabulary of the specialized wall-element model, in class-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WallElementClass {
    Mirror,
    Thermostat,
    Vent,
    WallSocket,
    WindowBox,
}

impl WallElementClass {
    pub const ALL: [WallElementClass; 5] = [
        WallElementClass::Mirror,
        WallElementClass::Thermostat,
        WallElementClass::Vent,
        WallElementClass::WallSocket,
        WallElementClass::WindowBox,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            WallElementClass::Mirror => "mirror",
            WallElementClass::Thermostat => "thermostat",
            WallElementClass::Vent => "vent",
            WallElementClass::WallSocket => "wall_socket",
            WallElementClass::WindowBox => "window_box_(for_plants)",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label)
    }
}

impl fmt::Display for WallElementClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub confidence_threshold: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
        }
    }
}

/// Runs the wall-element and general detectors on the same image and fuses
/// their output.
///
/// The wall-element detector is optional. Without one the service behaves as
/// if it returned nothing; fusion is the same either way.
pub struct DualDetectionService {
    general: Arc<dyn Detector>,
    wall: Arc<dyn Detector>,
    has_wall_detector: bool,
    detector_config: DetectorConfig,
    fusion: DetectionFusion,
}

impl DualDetectionService {
    pub fn new(general: Arc<dyn Detector>) -> Self {
        Self {
            general,
            wall: Arc::new(NoDetector),
            has_wall_detector: false,
            detector_config: DetectorConfig::default(),
            fusion: DetectionFusion::default(),
        }
    }

    pub fn with_wall_detector(mut self, wall: Arc<dyn Detector>) -> Self {
        self.wall = wall;
        self.has_wall_detector = true;
        self
    }

    pub fn with_config(mut self, detector: DetectorConfig, fusion: FusionConfig) -> Self {
        self.detector_config = detector;
        self.fusion = DetectionFusion::new(fusion);
        self
    }

    pub fn has_wall_detector(&self) -> bool {
        self.has_wall_detector
    }

    /// Detect with both models concurrently, then fuse.
    ///
    /// Either detector failing fails the whole call; no partial fusion.
    pub fn detect(&self, image: &RgbImage) -> Result<FusedDetections> {
        let threshold = self.detector_config.confidence_threshold;
        let (wall, general) = rayon::join(
            || {
                if self.has_wall_detector {
                    self.wall.detect(image, threshold)
                } else {
                    Ok(Vec::new())
                }
            },
            || self.general.detect(image, threshold),
        );
        let wall = tag(wall?, DetectionSource::WallElement);
        let general = tag(general?, DetectionSource::GeneralObject);
        debug!(wall = wall.len(), general = general.len(), "Detector candidates");

        Ok(self
            .fusion
            .fuse(wall, general, (image.width(), image.height())))
    }
}

fn tag(raw: Vec<RawDetection>, source: DetectionSource) -> Vec<DetectionCandidate> {
    raw.into_iter().map(|d| d.into_candidate(source)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DetectionError;

    struct Fixed(Vec<RawDetection>);

    impl Detector for Fixed {
        fn detect(&self, _image: &RgbImage, threshold: f32) -> Result<Vec<RawDetection>> {
            Ok(self
                .0
                .iter()
                .filter(|d| d.confidence >= threshold)
                .cloned()
                .collect())
        }
    }

    struct Failing;

    impl Detector for Failing {
        fn detect(&self, _image: &RgbImage, _threshold: f32) -> Result<Vec<RawDetection>> {
            Err(DetectionError::InferenceError("model crashed".into()))
        }
    }

    #[test]
    fn test_wall_vocabulary() {
        assert_eq!(WallElementClass::from_index(3), Some(WallElementClass::WallSocket));
        assert_eq!(WallElementClass::from_index(5), None);
        assert_eq!(
            WallElementClass::from_label("window_box_(for_plants)"),
            Some(WallElementClass::WindowBox)
        );
        assert_eq!(WallElementClass::Vent.to_string(), "vent");
    }

    #[test]
    fn test_without_wall_detector() {
        let general = Fixed(vec![RawDetection::new(
            "chair",
            0.8,
            BoundingBox::new(0.0, 0.0, 20.0, 20.0),
        )]);
        let service = DualDetectionService::new(Arc::new(general));
        assert!(!service.has_wall_detector());

        let res = service.detect(&RgbImage::new(64, 48)).unwrap();
        assert_eq!(res.total, 1);
        assert!(res.wall_elements.is_empty());
        assert_eq!(res.image_size, (64, 48));
    }

    #[test]
    fn test_cross_vocabulary_suppression() {
        let bbox = BoundingBox::new(10.0, 10.0, 30.0, 30.0);
        let service = DualDetectionService::new(Arc::new(Fixed(vec![RawDetection::new(
            "power outlet",
            0.6,
            bbox,
        )])))
        .with_wall_detector(Arc::new(Fixed(vec![RawDetection::new(
            WallElementClass::WallSocket.label(),
            0.9,
            bbox,
        )])));

        let res = service.detect(&RgbImage::new(64, 64)).unwrap();
        assert_eq!(res.total, 1);
        assert_eq!(res.all[0].class_label, "wall_socket");
        assert!(res.general_objects.is_empty());
    }

    #[test]
    fn test_confidence_threshold_applied() {
        let general = Fixed(vec![
            RawDetection::new("tv", 0.3, BoundingBox::new(0.0, 0.0, 5.0, 5.0)),
            RawDetection::new("sofa", 0.75, BoundingBox::new(10.0, 10.0, 50.0, 30.0)),
        ]);
        let service = DualDetectionService::new(Arc::new(general));
        let res = service.detect(&RgbImage::new(64, 64)).unwrap();
        assert_eq!(res.total, 1);
        assert_eq!(res.all[0].class_label, "sofa");
    }

    #[test]
    fn test_detector_failure_propagates() {
        let service = DualDetectionService::new(Arc::new(NoDetector)).with_wall_detector(Arc::new(Failing));
        assert!(matches!(
            service.detect(&RgbImage::new(8, 8)),
            Err(DetectionError::InferenceError(_))
        ));
    }
}
