//! Multi-Scan Stitching
//!
//! Every captured wall is registered pairwise against each earlier wall;
//! the best-fitting alignment is accepted when its fitness clears the
//! threshold. The wall's (possibly transformed) points are then appended to
//! the global cloud. There is no global optimization: drift across many
//! walls accumulates uncorrected.

use arc_core::{DepthMap, Plane, PointCloud};
use arc_objdetect::FusedDetections;
use arc_registration::{registration_icp, IcpConfig};
use image::RgbImage;
use nalgebra::Matrix4;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One captured wall.
///
/// Immutable after capture apart from `transform`, which only the stitcher
/// sets.
#[derive(Debug, Clone)]
pub struct WallScan {
    frame_id: u64,
    rgb_image: RgbImage,
    depth_map: Option<DepthMap>,
    point_cloud: PointCloud,
    detections: FusedDetections,
    plane: Option<Plane>,
    transform: Option<Matrix4<f32>>,
}

impl WallScan {
    pub fn new(
        frame_id: u64,
        rgb_image: RgbImage,
        depth_map: Option<DepthMap>,
        point_cloud: PointCloud,
        detections: FusedDetections,
        plane: Option<Plane>,
    ) -> Self {
        Self {
            frame_id,
            rgb_image,
            depth_map,
            point_cloud,
            detections,
            plane,
            transform: None,
        }
    }

    /// Scan made of a point cloud only.
    pub fn from_point_cloud(frame_id: u64, point_cloud: PointCloud) -> Self {
        Self::new(
            frame_id,
            RgbImage::new(0, 0),
            None,
            point_cloud,
            FusedDetections::default(),
            None,
        )
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn rgb_image(&self) -> &RgbImage {
        &self.rgb_image
    }

    pub fn depth_map(&self) -> Option<&DepthMap> {
        self.depth_map.as_ref()
    }

    /// Points in the scan's own camera frame.
    pub fn point_cloud(&self) -> &PointCloud {
        &self.point_cloud
    }

    pub fn detections(&self) -> &FusedDetections {
        &self.detections
    }

    pub fn plane(&self) -> Option<&Plane> {
        self.plane.as_ref()
    }

    /// Local-to-global transform; `None` means identity.
    pub fn transform(&self) -> Option<&Matrix4<f32>> {
        self.transform.as_ref()
    }

    /// Points expressed in the global frame.
    pub fn global_point_cloud(&self) -> PointCloud {
        match &self.transform {
            Some(t) => self.point_cloud.transformed(t),
            None => self.point_cloud.clone(),
        }
    }
}

/// Append-only accumulation of every merged wall.
#[derive(Debug, Clone, Default)]
pub struct GlobalPointCloud {
    cloud: PointCloud,
}

impl GlobalPointCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cloud.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cloud.is_empty()
    }

    pub fn as_point_cloud(&self) -> &PointCloud {
        &self.cloud
    }

    /// Owned copy for readers that must not observe later merges.
    pub fn snapshot(&self) -> PointCloud {
        self.cloud.clone()
    }

    fn append(&mut self, points: &PointCloud) {
        self.cloud.extend_from(points);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StitcherConfig {
    /// Best fitness must be strictly above this to accept an alignment.
    pub fitness_threshold: f32,
    /// Walls with fewer points are not registered against.
    pub min_registration_points: usize,
    pub icp: IcpConfig,
}

impl Default for StitcherConfig {
    fn default() -> Self {
        Self {
            fitness_threshold: 0.3,
            min_registration_points: 10,
            icp: IcpConfig::default(),
        }
    }
}

/// What happened to a wall's pose when it was added.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    /// First wall; defines the global frame.
    Origin,
    /// Aligned onto the wall at `against` (history index).
    Registered { against: usize, fitness: f32 },
    /// No alignment cleared the threshold; merged untransformed.
    Unregistered { best_fitness: Option<f32> },
    /// The scan had no points; history and global cloud are unchanged.
    Rejected,
}

impl RegistrationOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationOutcome::Registered { .. })
    }
}

/// Wall history plus the global cloud built from it.
#[derive(Debug, Default)]
pub struct WallStitcher {
    config: StitcherConfig,
    walls: Vec<WallScan>,
    global: GlobalPointCloud,
}

impl WallStitcher {
    pub fn new(config: StitcherConfig) -> Self {
        Self {
            config,
            walls: Vec::new(),
            global: GlobalPointCloud::new(),
        }
    }

    pub fn config(&self) -> &StitcherConfig {
        &self.config
    }

    pub fn walls(&self) -> &[WallScan] {
        &self.walls
    }

    pub fn wall_count(&self) -> usize {
        self.walls.len()
    }

    pub fn global_cloud(&self) -> &GlobalPointCloud {
        &self.global
    }

    /// Register `scan` against the history, append it and merge its points.
    ///
    /// A scan without points is ignored.
    pub fn add_wall(&mut self, mut scan: WallScan) -> RegistrationOutcome {
        if scan.point_cloud.is_empty() {
            info!(frame = scan.frame_id, "Wall has no points, not added");
            return RegistrationOutcome::Rejected;
        }

        let outcome = if self.walls.is_empty() {
            RegistrationOutcome::Origin
        } else {
            self.register_against_history(&mut scan)
        };

        match &outcome {
            RegistrationOutcome::Origin => {
                info!(
                    frame = scan.frame_id,
                    points = scan.point_cloud.len(),
                    "First wall defines the global frame"
                )
            }
            RegistrationOutcome::Registered { against, fitness } => {
                info!(frame = scan.frame_id, against, fitness, "Wall registered")
            }
            RegistrationOutcome::Unregistered { best_fitness } => info!(
                frame = scan.frame_id,
                best_fitness = best_fitness.unwrap_or(0.0),
                threshold = self.config.fitness_threshold,
                "Wall not registered, merging untransformed"
            ),
            RegistrationOutcome::Rejected => {}
        }

        self.global.append(&scan.global_point_cloud());
        self.walls.push(scan);
        outcome
    }

    fn register_against_history(&self, scan: &mut WallScan) -> RegistrationOutcome {
        let min_points = self.config.min_registration_points;
        if scan.point_cloud.len() < min_points {
            debug!(points = scan.point_cloud.len(), min_points, "New wall too small to register");
            return RegistrationOutcome::Unregistered { best_fitness: None };
        }

        let identity = Matrix4::identity();
        // (history index, fitness, transform into that wall's local frame)
        let mut best: Option<(usize, f32, Matrix4<f32>)> = None;

        for (i, prev) in self.walls.iter().enumerate() {
            if prev.point_cloud.len() < min_points {
                debug!(against = i, points = prev.point_cloud.len(), "Skipping degenerate wall");
                continue;
            }
            let Some(result) =
                registration_icp(&scan.point_cloud, &prev.point_cloud, &identity, &self.config.icp)
            else {
                continue;
            };
            debug!(against = i, fitness = result.fitness, "Pairwise registration");

            // Strictly greater, so the earliest wall wins ties.
            if best.as_ref().map_or(true, |(_, f, _)| result.fitness > *f) {
                best = Some((i, result.fitness, result.transformation));
            }
        }

        match best {
            Some((against, fitness, local)) if fitness > self.config.fitness_threshold => {
                let to_global = self.walls[against]
                    .transform
                    .map_or(local, |prev_to_global| prev_to_global * local);
                scan.transform = Some(to_global);
                RegistrationOutcome::Registered { against, fitness }
            }
            best => RegistrationOutcome::Unregistered {
                best_fitness: best.map(|(_, f, _)| f),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arc_core::{is_identity, rigid_transform};
    use nalgebra::{Point3, Rotation3, Vector3};

    fn grid(z: f32) -> PointCloud {
        let mut points = Vec::new();
        for i in 0..15 {
            for j in 0..15 {
                let (x, y) = (i as f32 * 20.0, j as f32 * 20.0);
                // A ridge so the grid is not purely planar.
                points.push(Point3::new(x, y, z + if i == 7 { 40.0 } else { 0.0 }));
            }
        }
        PointCloud::new(points)
    }

    #[test]
    fn test_first_wall_is_origin() {
        let mut stitcher = WallStitcher::default();
        let outcome = stitcher.add_wall(WallScan::from_point_cloud(1, grid(0.0)));
        assert_eq!(outcome, RegistrationOutcome::Origin);
        assert!(stitcher.walls()[0].transform().is_none());
        assert_eq!(stitcher.global_cloud().len(), 225);
    }

    #[test]
    fn test_global_cloud_only_grows() {
        let mut stitcher = WallStitcher::default();
        let mut last = 0;
        for (k, z) in [0.0, 500.0, 5000.0].into_iter().enumerate() {
            stitcher.add_wall(WallScan::from_point_cloud(k as u64, grid(z)));
            assert!(stitcher.global_cloud().len() > last);
            last = stitcher.global_cloud().len();
        }
        assert_eq!(last, 3 * 225);
        assert_eq!(stitcher.wall_count(), 3);
    }

    #[test]
    fn test_far_wall_is_unregistered() {
        let mut stitcher = WallStitcher::default();
        stitcher.add_wall(WallScan::from_point_cloud(1, grid(0.0)));
        let outcome = stitcher.add_wall(WallScan::from_point_cloud(2, grid(5000.0)));
        assert!(matches!(outcome, RegistrationOutcome::Unregistered { best_fitness: Some(f) } if f == 0.0));
        assert!(stitcher.walls()[1].transform().is_none());
    }

    #[test]
    fn test_degenerate_walls_skipped() {
        let mut stitcher = WallStitcher::default();
        stitcher.add_wall(WallScan::from_point_cloud(1, PointCloud::new(vec![Point3::origin(); 3])));
        let outcome = stitcher.add_wall(WallScan::from_point_cloud(2, grid(0.0)));
        assert_eq!(outcome, RegistrationOutcome::Unregistered { best_fitness: None });

        let outcome = stitcher.add_wall(WallScan::from_point_cloud(3, PointCloud::new(Vec::new())));
        assert_eq!(outcome, RegistrationOutcome::Rejected);
        assert_eq!(stitcher.wall_count(), 2);
    }

    #[test]
    fn test_empty_wall_is_not_counted() {
        let mut stitcher = WallStitcher::default();
        let outcome = stitcher.add_wall(WallScan::from_point_cloud(1, PointCloud::new(Vec::new())));
        assert_eq!(outcome, RegistrationOutcome::Rejected);
        assert_eq!(stitcher.wall_count(), 0);
        assert!(stitcher.global_cloud().is_empty());

        // The first real wall still defines the global frame.
        let outcome = stitcher.add_wall(WallScan::from_point_cloud(2, grid(0.0)));
        assert_eq!(outcome, RegistrationOutcome::Origin);
        assert_eq!(stitcher.wall_count(), 1);
    }

    #[test]
    fn test_transform_composes_with_target_pose() {
        let mut stitcher = WallStitcher::default();
        stitcher.add_wall(WallScan::from_point_cloud(1, grid(0.0)));

        let shift = rigid_transform(&Rotation3::identity().into_inner(), &Vector3::new(3.0, -2.0, 1.5));
        let second = grid(0.0).transformed(&shift);
        assert!(stitcher.add_wall(WallScan::from_point_cloud(2, second.clone())).is_registered());

        // Whichever wall it aligns onto, the resulting pose is global.
        let third = second.transformed(&shift);
        let outcome = stitcher.add_wall(WallScan::from_point_cloud(3, third));
        assert!(outcome.is_registered());

        let t3 = stitcher.walls()[2].transform().copied().unwrap();
        let recovered = t3 * shift * shift;
        assert!(is_identity(&recovered, 0.5), "{recovered}");
    }
}
