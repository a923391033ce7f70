//! Room surface reconstruction from an accumulated point cloud.
//!
//! Pipeline: voxel downsampling, kNN normal estimation, outward normal
//! orientation, Poisson indicator solve, iso-surface extraction, optional
//! trimming of faces far from the data, and vertex color transfer.

use super::poisson::{extract_iso_surface, solve_indicator};
use super::processing::{retain_faces, transfer_vertex_colors};
use super::TriangleMesh;
use arc_core::point_cloud::PointCloud;
use arc_core::Result;
use arc_point_cloud::{
    estimate_normals, orient_normals, orient_normals_towards, voxel_down_sample, PointIndex,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use tracing::{debug, info};

/// Fewest downsampled points worth reconstructing.
const MIN_SAMPLES: usize = 4;

/// How sample normals are given a consistent sign before the solve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalOrientation {
    /// Point away from the cloud centroid; suits a room scanned from inside.
    #[default]
    AwayFromCentroid,
    /// Propagate a sign over the kNN graph, then flip globally so most
    /// normals point away from the centroid.
    Propagation,
}

/// Parameters of the room reconstruction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Voxel edge used to downsample the global cloud, in world units.
    pub voxel_size: f32,
    /// Neighbours used for normal estimation.
    pub normal_neighbors: usize,
    pub orientation: NormalOrientation,
    /// Grid resolution is `2^octree_depth` nodes per axis.
    pub octree_depth: usize,
    /// Accepted walls required before a mesh is produced.
    pub min_walls: usize,
    pub solver_iterations: usize,
    /// Relative residual at which the Poisson solve stops.
    pub solver_tolerance: f64,
    /// Drop faces farther than this many voxels from any sample.
    pub density_trim: Option<f32>,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            voxel_size: 50.0,
            normal_neighbors: 30,
            orientation: NormalOrientation::AwayFromCentroid,
            octree_depth: 7,
            min_walls: 2,
            solver_iterations: 400,
            solver_tolerance: 1e-5,
            density_trim: None,
        }
    }
}

/// Why no mesh was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsufficientData {
    TooFewWalls { walls: usize, required: usize },
    TooFewPoints { points: usize, required: usize },
}

impl std::fmt::Display for InsufficientData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InsufficientData::TooFewWalls { walls, required } => {
                write!(f, "need at least {required} walls, have {walls}")
            }
            InsufficientData::TooFewPoints { points, required } => {
                write!(f, "need at least {required} points after downsampling, have {points}")
            }
        }
    }
}

/// Result of a room mesh request.
#[derive(Debug, Clone)]
pub enum RoomMeshOutcome {
    Mesh(TriangleMesh),
    InsufficientData(InsufficientData),
}

impl RoomMeshOutcome {
    pub fn mesh(&self) -> Option<&TriangleMesh> {
        match self {
            RoomMeshOutcome::Mesh(mesh) => Some(mesh),
            RoomMeshOutcome::InsufficientData(_) => None,
        }
    }

    pub fn into_mesh(self) -> Option<TriangleMesh> {
        match self {
            RoomMeshOutcome::Mesh(mesh) => Some(mesh),
            RoomMeshOutcome::InsufficientData(_) => None,
        }
    }
}

/// Poisson Surface Reconstruction
///
/// `cloud` must carry normals; they are used as given.
pub fn poisson_reconstruction(
    cloud: &PointCloud,
    depth: usize,
    max_iterations: usize,
    tolerance: f64,
    cancel: Option<&AtomicBool>,
) -> Result<TriangleMesh> {
    let normals = cloud.normals.as_ref().ok_or_else(|| {
        arc_core::Error::InvalidInput("Poisson reconstruction requires normals".into())
    })?;

    let grid = solve_indicator(&cloud.points, normals, depth, max_iterations, tolerance, cancel)?;
    let iso = cloud.points.iter().map(|p| grid.sample(p)).sum::<f32>() / cloud.len() as f32;
    Ok(extract_iso_surface(&grid, iso))
}

fn orient_sample_normals(samples: &mut PointCloud, orientation: NormalOrientation, k: usize) {
    let Some(centroid) = samples.centroid() else {
        return;
    };
    match orientation {
        NormalOrientation::AwayFromCentroid => orient_normals_towards(samples, &centroid, true),
        NormalOrientation::Propagation => {
            orient_normals(samples, k);
            let points = &samples.points;
            if let Some(normals) = samples.normals.as_mut() {
                let outward = points
                    .iter()
                    .zip(normals.iter())
                    .filter(|(p, n)| n.dot(&(*p - centroid)) > 0.0)
                    .count();
                if outward * 2 < normals.len() {
                    normals.iter_mut().for_each(|n| *n = -*n);
                }
            }
        }
    }
}

/// Builds the room mesh from the global point cloud.
#[derive(Debug, Clone, Default)]
pub struct SurfaceReconstructor {
    config: ReconstructionConfig,
}

impl SurfaceReconstructor {
    pub fn new(config: ReconstructionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    /// Reconstruct a mesh from `cloud`, captured as `wall_count` walls.
    ///
    /// Too few walls or points is an [`RoomMeshOutcome::InsufficientData`]
    /// outcome; setting `cancel` aborts the solve with `Error::Cancelled`.
    pub fn reconstruct_room(
        &self,
        wall_count: usize,
        cloud: &PointCloud,
        cancel: Option<&AtomicBool>,
    ) -> Result<RoomMeshOutcome> {
        let cfg = &self.config;
        if wall_count < cfg.min_walls {
            info!(walls = wall_count, required = cfg.min_walls, "Not enough walls for a room mesh");
            return Ok(RoomMeshOutcome::InsufficientData(InsufficientData::TooFewWalls {
                walls: wall_count,
                required: cfg.min_walls,
            }));
        }

        let mut samples = voxel_down_sample(cloud, cfg.voxel_size);
        if samples.len() < MIN_SAMPLES {
            info!(points = samples.len(), "Not enough points for a room mesh");
            return Ok(RoomMeshOutcome::InsufficientData(InsufficientData::TooFewPoints {
                points: samples.len(),
                required: MIN_SAMPLES,
            }));
        }
        debug!(input = cloud.len(), samples = samples.len(), "Downsampled global cloud");

        estimate_normals(&mut samples, cfg.normal_neighbors);
        orient_sample_normals(&mut samples, cfg.orientation, cfg.normal_neighbors);

        let mut mesh = poisson_reconstruction(
            &samples,
            cfg.octree_depth,
            cfg.solver_iterations,
            cfg.solver_tolerance,
            cancel,
        )?;

        if let Some(trim) = cfg.density_trim {
            let max_dist = trim * cfg.voxel_size;
            let index = PointIndex::new(&samples.points);
            let before = mesh.num_faces();
            retain_faces(&mut mesh, |m, f| {
                let c = nalgebra::Point3::from(
                    (m.vertices[f[0]].coords + m.vertices[f[1]].coords + m.vertices[f[2]].coords)
                        / 3.0,
                );
                index
                    .nearest(&c)
                    .is_some_and(|(_, d2)| d2 <= max_dist * max_dist)
            });
            debug!(before, after = mesh.num_faces(), "Trimmed low-density faces");
        }

        transfer_vertex_colors(&mut mesh, &samples);
        mesh.compute_vertex_normals();

        info!(
            vertices = mesh.num_vertices(),
            faces = mesh.num_faces(),
            "Reconstructed room mesh"
        );
        Ok(RoomMeshOutcome::Mesh(mesh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    /// Two perpendicular walls, 20 unit spacing, with colors.
    fn two_walls() -> PointCloud {
        let mut points = Vec::new();
        for a in 0..40 {
            for b in 0..30 {
                let (u, v) = (a as f32 * 20.0, b as f32 * 20.0);
                points.push(Point3::new(u, v, 800.0));
                points.push(Point3::new(0.0, v, u));
            }
        }
        let colors = vec![Point3::new(0.8, 0.6, 0.4); points.len()];
        PointCloud::new(points).with_colors(colors).unwrap()
    }

    fn fast_config() -> ReconstructionConfig {
        ReconstructionConfig {
            octree_depth: 5,
            normal_neighbors: 12,
            ..Default::default()
        }
    }

    #[test]
    fn test_insufficient_walls() {
        let rec = SurfaceReconstructor::new(fast_config());
        for walls in [0, 1] {
            let res = rec.reconstruct_room(walls, &two_walls(), None).unwrap();
            assert!(matches!(
                res,
                RoomMeshOutcome::InsufficientData(InsufficientData::TooFewWalls { required: 2, .. })
            ));
        }
    }

    #[test]
    fn test_insufficient_points() {
        let rec = SurfaceReconstructor::new(fast_config());
        let cloud = PointCloud::new(vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)]);
        let res = rec.reconstruct_room(2, &cloud, None).unwrap();
        assert!(matches!(
            res,
            RoomMeshOutcome::InsufficientData(InsufficientData::TooFewPoints { .. })
        ));
    }

    #[test]
    fn test_two_walls_produce_colored_mesh() {
        let rec = SurfaceReconstructor::new(fast_config());
        let mesh = rec
            .reconstruct_room(2, &two_walls(), None)
            .unwrap()
            .into_mesh()
            .unwrap();

        assert!(mesh.num_faces() > 0);
        let colors = mesh.colors.as_ref().unwrap();
        assert_eq!(colors.len(), mesh.num_vertices());
        assert!((colors[0] - Point3::new(0.8, 0.6, 0.4)).norm() < 1e-5);
        assert!(mesh.faces.iter().flatten().all(|&v| v < mesh.num_vertices()));
    }

    #[test]
    fn test_density_trim_removes_far_faces() {
        let untrimmed = SurfaceReconstructor::new(fast_config())
            .reconstruct_room(2, &two_walls(), None)
            .unwrap()
            .into_mesh()
            .unwrap();
        let trimmed = SurfaceReconstructor::new(ReconstructionConfig {
            density_trim: Some(1.0),
            ..fast_config()
        })
        .reconstruct_room(2, &two_walls(), None)
        .unwrap()
        .into_mesh()
        .unwrap();

        assert!(trimmed.num_faces() <= untrimmed.num_faces());
        assert!(trimmed.faces.iter().flatten().all(|&v| v < trimmed.num_vertices()));
    }

    #[test]
    fn test_propagated_orientation() {
        let rec = SurfaceReconstructor::new(ReconstructionConfig {
            orientation: NormalOrientation::Propagation,
            ..fast_config()
        });
        let res = rec.reconstruct_room(3, &two_walls(), None).unwrap();
        assert!(res.mesh().is_some_and(|m| !m.is_empty()));
    }

    #[test]
    fn test_cancel_aborts() {
        let cancel = AtomicBool::new(true);
        let res = SurfaceReconstructor::new(fast_config()).reconstruct_room(
            2,
            &two_walls(),
            Some(&cancel),
        );
        assert!(matches!(res, Err(arc_core::Error::Cancelled)));
    }
}
