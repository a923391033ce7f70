//! Scanner configuration.
//!
//! One serializable record aggregating every component's parameters, so a
//! session can be reproduced from a single JSON file.

use crate::Result;
use arc_3d::ReconstructionConfig;
use arc_core::BackProjectionConfig;
use arc_objdetect::{DetectorConfig, FusionConfig};
use arc_point_cloud::PlaneExtractorConfig;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::stitching::StitcherConfig;

/// Which frames run the expensive depth/geometry path.
///
/// Detection runs on every frame regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingPolicy {
    EveryFrame,
    /// Frames whose 1-based sequence number is a multiple of `n`.
    EveryNth(u64),
}

impl SamplingPolicy {
    pub fn should_process(&self, frame_id: u64) -> bool {
        match *self {
            SamplingPolicy::EveryFrame => true,
            SamplingPolicy::EveryNth(0) | SamplingPolicy::EveryNth(1) => true,
            SamplingPolicy::EveryNth(n) => frame_id % n == 0,
        }
    }
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        SamplingPolicy::EveryNth(3)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub back_projection: BackProjectionConfig,
    pub plane: PlaneExtractorConfig,
    pub stitcher: StitcherConfig,
    pub reconstruction: ReconstructionConfig,
    pub detector: DetectorConfig,
    pub fusion: FusionConfig,
    pub sampling: SamplingPolicy,
}

impl ScannerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ScannerConfig::default();
        assert_eq!(cfg.back_projection.fx, 525.0);
        assert_eq!(cfg.back_projection.depth_scale, 1000.0);
        assert_eq!(cfg.plane.distance_threshold, 20.0);
        assert_eq!(cfg.plane.num_iterations, 1000);
        assert_eq!(cfg.stitcher.fitness_threshold, 0.3);
        assert_eq!(cfg.stitcher.icp.max_correspondence_distance, 100.0);
        assert_eq!(cfg.reconstruction.voxel_size, 50.0);
        assert_eq!(cfg.reconstruction.octree_depth, 7);
        assert_eq!(cfg.fusion.iou_threshold, 0.5);
        assert_eq!(cfg.detector.confidence_threshold, 0.5);
        assert_eq!(cfg.sampling, SamplingPolicy::EveryNth(3));
    }

    #[test]
    fn test_sampling_policy() {
        let every_third = SamplingPolicy::EveryNth(3);
        let picked: Vec<u64> = (1..=9).filter(|&f| every_third.should_process(f)).collect();
        assert_eq!(picked, [3, 6, 9]);
        assert!((1..5).all(|f| SamplingPolicy::EveryFrame.should_process(f)));
        assert!(SamplingPolicy::EveryNth(0).should_process(7));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg = ScannerConfig::from_json(
            r#"{ "sampling": "every_frame", "stitcher": { "fitness_threshold": 0.5 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.sampling, SamplingPolicy::EveryFrame);
        assert_eq!(cfg.stitcher.fitness_threshold, 0.5);
        assert_eq!(cfg.stitcher.min_registration_points, 10);
        assert_eq!(cfg.reconstruction.octree_depth, 7);
    }

    #[test]
    fn test_partial_back_projection_fills_defaults() {
        let cfg = ScannerConfig::from_json(r#"{ "back_projection": { "fx": 600.0 } }"#).unwrap();
        assert_eq!(cfg.back_projection.fx, 600.0);
        assert_eq!(cfg.back_projection.fy, 525.0);
        assert_eq!(cfg.back_projection.depth_scale, 1000.0);
        assert_eq!(cfg.back_projection.max_depth, 10000.0);
    }

    #[test]
    fn test_json_roundtrip() {
        let mut cfg = ScannerConfig::default();
        cfg.sampling = SamplingPolicy::EveryNth(5);
        cfg.plane.seed = Some(7);
        let back = ScannerConfig::from_json(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(back.sampling, SamplingPolicy::EveryNth(5));
        assert_eq!(back.plane.seed, Some(7));
    }

    #[test]
    fn test_bad_json_is_config_error() {
        assert!(matches!(
            ScannerConfig::from_json("{ not json"),
            Err(crate::ScanError::Config(_))
        ));
    }
}
