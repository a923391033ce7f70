//! Object detection fusion
//!
//! This crate merges the outputs of a specialized wall-element detector and
//! a general-purpose detector into one ranked, de-duplicated result set.
//! The detectors themselves are external; they plug in through [`Detector`].

pub mod bbox;
pub mod detector;
pub mod fusion;

pub use bbox::BoundingBox;
pub use detector::{
    Detector, DetectorConfig, DualDetectionService, NoDetector, RawDetection, WallElementClass,
};
pub use fusion::{
    fuse_detections, DetectionCandidate, DetectionFusion, DetectionSource, FusedDetection,
    FusedDetections, FusionConfig,
};

pub type Result<T> = std::result::Result<T, DetectionError>;

#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Inference error: {0}")]
    InferenceError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
