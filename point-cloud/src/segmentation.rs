//! Dominant-plane extraction.
//!
//! RANSAC over the generic engine in `arc_core::robust`. A scan that is too
//! small or has no plane with enough support yields
//! [`PlaneExtraction::NoPlane`] rather than an error.

use arc_core::{Plane, PointCloud, Ransac, RobustConfig, RobustModel};
use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Plane hypothesis from a sample of points.
///
/// Three points give the exact plane; larger samples are fitted by
/// least squares (smallest principal axis of the sample covariance).
pub struct PlaneEstimator {
    sample_size: usize,
}

impl PlaneEstimator {
    pub fn new(sample_size: usize) -> Self {
        Self {
            sample_size: sample_size.max(3),
        }
    }
}

impl Default for PlaneEstimator {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RobustModel<Point3<f32>> for PlaneEstimator {
    type Model = Plane;

    fn min_sample_size(&self) -> usize {
        self.sample_size
    }

    fn estimate(&self, data: &[&Point3<f32>]) -> Option<Plane> {
        match data {
            [p1, p2, p3] => Plane::from_points(p1, p2, p3),
            _ if data.len() > 3 => fit_plane(data),
            _ => None,
        }
    }

    fn compute_error(&self, model: &Plane, data: &Point3<f32>) -> f64 {
        model.distance(data) as f64
    }
}

fn fit_plane(data: &[&Point3<f32>]) -> Option<Plane> {
    let centroid =
        data.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / data.len() as f32;
    let mut cov = Matrix3::zeros();
    for p in data {
        let d = p.coords - centroid;
        cov += d * d.transpose();
    }
    let eigen = SymmetricEigen::new(cov);
    let normal = eigen.eigenvectors.column(eigen.eigenvalues.imin()).into_owned();
    Plane::from_coefficients([normal.x, normal.y, normal.z, -normal.dot(&centroid)])
}

/// Segment the best-supported plane with RANSAC.
///
/// Returns the plane (if any hypothesis was valid) and the indices of the
/// points within `distance_threshold` of it.
pub fn segment_plane(
    pc: &PointCloud,
    distance_threshold: f32,
    ransac_n: usize,
    num_iterations: usize,
    seed: Option<u64>,
) -> (Option<Plane>, Vec<usize>) {
    if ransac_n < 3 || pc.len() < ransac_n {
        return (None, Vec::new());
    }

    let config = RobustConfig {
        threshold: distance_threshold as f64,
        max_iterations: num_iterations,
        confidence: 0.99,
        min_sample_size: ransac_n,
        seed,
    };

    let res = Ransac::new(config).run(&PlaneEstimator::new(ransac_n), &pc.points);
    let inliers = res.inlier_indices();
    (res.model, inliers)
}

/// Parameters of the wall-plane extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaneExtractorConfig {
    /// Maximum perpendicular distance of an inlier, in world units.
    pub distance_threshold: f32,
    pub ransac_n: usize,
    pub num_iterations: usize,
    /// A cloud must have strictly more points than this to be considered.
    pub min_points: usize,
    /// Minimum share of the cloud the best plane must explain.
    pub min_inlier_fraction: f32,
    pub seed: Option<u64>,
}

impl Default for PlaneExtractorConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 20.0,
            ransac_n: 3,
            num_iterations: 1000,
            min_points: 100,
            min_inlier_fraction: 0.1,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NoPlaneReason {
    TooFewPoints { count: usize, min: usize },
    NoConsensus { best_inliers: usize, required: usize },
}

/// Outcome of wall-plane extraction.
#[derive(Debug, Clone)]
pub enum PlaneExtraction {
    Found {
        inliers: PointCloud,
        plane: Plane,
        inlier_indices: Vec<usize>,
    },
    NoPlane(NoPlaneReason),
}

impl PlaneExtraction {
    pub fn is_found(&self) -> bool {
        matches!(self, PlaneExtraction::Found { .. })
    }

    pub fn plane(&self) -> Option<&Plane> {
        match self {
            PlaneExtraction::Found { plane, .. } => Some(plane),
            PlaneExtraction::NoPlane(_) => None,
        }
    }
}

/// Isolate the dominant planar surface of a scan.
pub fn extract_wall_plane(pc: &PointCloud, config: &PlaneExtractorConfig) -> PlaneExtraction {
    let count = pc.len();
    if count <= config.min_points {
        debug!(count, min = config.min_points, "Too few points for plane extraction");
        return PlaneExtraction::NoPlane(NoPlaneReason::TooFewPoints {
            count,
            min: config.min_points,
        });
    }

    let (plane, inlier_indices) = segment_plane(
        pc,
        config.distance_threshold,
        config.ransac_n,
        config.num_iterations,
        config.seed,
    );

    let required = ((count as f32 * config.min_inlier_fraction).ceil() as usize).max(config.ransac_n);
    match plane {
        Some(plane) if inlier_indices.len() >= required => {
            debug!(
                inliers = inlier_indices.len(),
                total = count,
                "Extracted wall plane"
            );
            PlaneExtraction::Found {
                inliers: pc.select_by_index(&inlier_indices),
                plane,
                inlier_indices,
            }
        }
        _ => {
            debug!(best = inlier_indices.len(), required, "No plane with enough support");
            PlaneExtraction::NoPlane(NoPlaneReason::NoConsensus {
                best_inliers: inlier_indices.len(),
                required,
            })
        }
    }
}
