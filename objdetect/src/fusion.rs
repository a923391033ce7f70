//! Detection Fusion
//!
//! Greedy IoU suppression over the pooled candidates of both detectors.
//! Suppression is purely geometric: a box is dropped when it overlaps an
//! already accepted, higher-confidence box by more than the threshold,
//! whatever either box's class label says.

use crate::bbox::BoundingBox;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Which detector produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    WallElement,
    GeneralObject,
}

/// One detector output, tagged with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionCandidate {
    pub class_label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub source: DetectionSource,
}

impl DetectionCandidate {
    pub fn new(
        class_label: impl Into<String>,
        confidence: f32,
        bbox: BoundingBox,
        source: DetectionSource,
    ) -> Self {
        Self {
            class_label: class_label.into(),
            confidence,
            bbox,
            source,
        }
    }
}

/// A candidate that survived overlap suppression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedDetection {
    pub class_label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub source: DetectionSource,
}

impl From<DetectionCandidate> for FusedDetection {
    fn from(c: DetectionCandidate) -> Self {
        Self {
            class_label: c.class_label,
            confidence: c.confidence,
            bbox: c.bbox,
            source: c.source,
        }
    }
}

/// Fused result for one frame.
///
/// `all` is ordered by descending confidence; the two partitions keep that
/// order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FusedDetections {
    pub wall_elements: Vec<FusedDetection>,
    pub general_objects: Vec<FusedDetection>,
    pub all: Vec<FusedDetection>,
    pub total: usize,
    /// `(width, height)` of the source image.
    pub image_size: (u32, u32),
}

impl FusedDetections {
    pub fn from_accepted(all: Vec<FusedDetection>, image_size: (u32, u32)) -> Self {
        let (wall_elements, general_objects): (Vec<_>, Vec<_>) = all
            .iter()
            .cloned()
            .partition(|d| d.source == DetectionSource::WallElement);
        Self {
            wall_elements,
            general_objects,
            total: all.len(),
            all,
            image_size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Candidates overlapping an accepted box by more than this are dropped.
    pub iou_threshold: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { iou_threshold: 0.5 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DetectionFusion {
    config: FusionConfig,
}

impl DetectionFusion {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Pool, rank and suppress.
    ///
    /// Wall-element candidates are pooled before general ones, so on equal
    /// confidence the wall detector's box ranks first. Candidates with a
    /// non-finite confidence are discarded.
    pub fn suppress(
        &self,
        wall_elements: Vec<DetectionCandidate>,
        general_objects: Vec<DetectionCandidate>,
    ) -> Vec<FusedDetection> {
        let mut pool: Vec<DetectionCandidate> = wall_elements
            .into_iter()
            .chain(general_objects)
            .filter(|c| {
                let finite = c.confidence.is_finite();
                if !finite {
                    warn!(label = %c.class_label, "Dropping detection with non-finite confidence");
                }
                finite
            })
            .collect();
        let pooled = pool.len();

        // Stable, so ties keep pool order.
        pool.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let mut accepted: Vec<FusedDetection> = Vec::with_capacity(pool.len());
        for candidate in pool {
            let overlaps = accepted
                .iter()
                .any(|kept| candidate.bbox.iou(&kept.bbox) > self.config.iou_threshold);
            if !overlaps {
                accepted.push(candidate.into());
            }
        }

        debug!(pooled, accepted = accepted.len(), "Fused detections");
        accepted
    }

    /// [`suppress`](Self::suppress), partitioned by source.
    pub fn fuse(
        &self,
        wall_elements: Vec<DetectionCandidate>,
        general_objects: Vec<DetectionCandidate>,
        image_size: (u32, u32),
    ) -> FusedDetections {
        FusedDetections::from_accepted(self.suppress(wall_elements, general_objects), image_size)
    }
}

/// Fuse two candidate lists with the default IoU threshold.
pub fn fuse_detections(
    candidates_a: Vec<DetectionCandidate>,
    candidates_b: Vec<DetectionCandidate>,
) -> Vec<FusedDetection> {
    DetectionFusion::default().suppress(candidates_a, candidates_b)
}
