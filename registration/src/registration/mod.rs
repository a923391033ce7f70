//! Pairwise rigid registration.
//!
//! Iterative Closest Point with two error metrics:
//! - point-to-point (closed-form Kabsch/SVD update), the default
//! - point-to-plane (linearized 6-DOF least squares on target normals)
//!
//! Convergence follows the usual relative criterion: iteration stops once
//! both fitness and inlier RMSE change by less than the configured amounts.

use arc_core::{skew_symmetric, PointCloud};
use arc_point_cloud::PointIndex;
use nalgebra::{Matrix3, Matrix4, Matrix6, Point3, Vector3, Vector6};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Error metric minimized by each ICP step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IcpMethod {
    #[default]
    PointToPoint,
    /// Requires target normals; falls back to point-to-point without them.
    PointToPlane,
}

/// ICP parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpConfig {
    /// Pairs farther apart than this (world units) are not correspondences.
    pub max_correspondence_distance: f32,
    pub max_iterations: usize,
    /// Stop when fitness changes by less than this between iterations...
    pub relative_fitness: f32,
    /// ...and inlier RMSE changes by less than this.
    pub relative_rmse: f32,
    pub method: IcpMethod,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            max_correspondence_distance: 100.0,
            max_iterations: 30,
            relative_fitness: 1e-6,
            relative_rmse: 1e-6,
            method: IcpMethod::PointToPoint,
        }
    }
}

/// ICP (Iterative Closest Point) registration result
///
/// # Fields
///
/// * `transformation` - 4×4 rigid transform mapping source into the target frame
/// * `fitness` - Fraction of source points with a correspondence (0-1 range)
/// * `inlier_rmse` - RMS distance over those correspondences
/// * `num_iterations` - Update steps performed
#[derive(Debug, Clone)]
pub struct ICPResult {
    pub transformation: Matrix4<f32>,
    pub fitness: f32,
    pub inlier_rmse: f32,
    pub num_iterations: usize,
}

/// Correspondence set for one source pose.
struct Correspondences {
    /// `(source index, target index)`
    pairs: Vec<(usize, usize)>,
    fitness: f32,
    rmse: f32,
}

fn find_correspondences(
    index: &PointIndex,
    moved: &[Point3<f32>],
    max_distance: f32,
) -> Correspondences {
    let max_sq = max_distance * max_distance;

    let found: Vec<(usize, usize, f32)> = moved
        .par_iter()
        .enumerate()
        .filter_map(|(i, p)| {
            index
                .nearest(p)
                .filter(|&(_, d2)| d2 <= max_sq)
                .map(|(j, d2)| (i, j, d2))
        })
        .collect();

    let fitness = if moved.is_empty() {
        0.0
    } else {
        found.len() as f32 / moved.len() as f32
    };
    let rmse = if found.is_empty() {
        0.0
    } else {
        let sum: f64 = found.iter().map(|&(_, _, d2)| d2 as f64).sum();
        (sum / found.len() as f64).sqrt() as f32
    };

    Correspondences {
        pairs: found.into_iter().map(|(i, j, _)| (i, j)).collect(),
        fitness,
        rmse,
    }
}

fn transform_points(points: &[Point3<f32>], transformation: &Matrix4<f32>) -> Vec<Point3<f32>> {
    points
        .par_iter()
        .map(|p| transformation.transform_point(p))
        .collect()
}

/// Closed-form rigid update aligning matched pairs (Kabsch).
fn estimate_point_to_point(
    moved: &[Point3<f32>],
    target: &[Point3<f32>],
    pairs: &[(usize, usize)],
) -> Option<Matrix4<f64>> {
    if pairs.len() < 3 {
        return None;
    }
    let n = pairs.len() as f64;

    let (mut cs, mut ct) = (Vector3::<f64>::zeros(), Vector3::<f64>::zeros());
    for &(i, j) in pairs {
        cs += moved[i].coords.cast::<f64>();
        ct += target[j].coords.cast::<f64>();
    }
    cs /= n;
    ct /= n;

    let mut h = Matrix3::<f64>::zeros();
    for &(i, j) in pairs {
        let s = moved[i].coords.cast::<f64>() - cs;
        let t = target[j].coords.cast::<f64>() - ct;
        h += s * t.transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v = svd.v_t?.transpose();

    let mut d = Matrix3::<f64>::identity();
    if (v * u.transpose()).determinant() < 0.0 {
        d[(2, 2)] = -1.0;
    }
    let rotation = v * d * u.transpose();
    let translation = ct - rotation * cs;

    let mut update = Matrix4::<f64>::identity();
    update.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
    update.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
    Some(update)
}

/// Gauss-Newton step on point-to-plane residuals `(p - q) · n_q`.
fn estimate_point_to_plane(
    moved: &[Point3<f32>],
    target: &[Point3<f32>],
    target_normals: &[Vector3<f32>],
    pairs: &[(usize, usize)],
) -> Option<Matrix4<f64>> {
    if pairs.len() < 6 {
        return None;
    }

    let (ata, atb) = pairs
        .par_iter()
        .map(|&(i, j)| {
            let p = moved[i].coords.cast::<f64>();
            let q = target[j].coords.cast::<f64>();
            let n = target_normals[j].cast::<f64>();
            let residual = (p - q).dot(&n);

            // delta layout [v, omega]
            let cross = p.cross(&n);
            let jacobian = Vector6::new(n.x, n.y, n.z, cross.x, cross.y, cross.z);
            (jacobian * jacobian.transpose(), jacobian * residual)
        })
        .reduce(
            || (Matrix6::zeros(), Vector6::zeros()),
            |a, b| (a.0 + b.0, a.1 + b.1),
        );

    let delta = ata.cholesky()?.solve(&(-atb));
    Some(exponential_map_se3(&delta))
}

/// Register `source` onto `target` with ICP, starting from `init`.
///
/// Returns `None` only when either cloud is empty. A result with low fitness
/// is a valid outcome; callers decide whether to accept it.
pub fn registration_icp(
    source: &PointCloud,
    target: &PointCloud,
    init: &Matrix4<f32>,
    config: &IcpConfig,
) -> Option<ICPResult> {
    if source.is_empty() || target.is_empty() {
        return None;
    }

    let method = match (config.method, target.normals.as_ref()) {
        (IcpMethod::PointToPlane, None) => {
            warn!("Point-to-plane ICP requested but target has no normals, using point-to-point");
            IcpMethod::PointToPoint
        }
        (m, _) => m,
    };

    let index = PointIndex::new(&target.points);
    let max_dist = config.max_correspondence_distance;

    let mut transformation = init.cast::<f64>();
    let mut moved = transform_points(&source.points, init);
    let mut current = find_correspondences(&index, &moved, max_dist);
    let mut iterations = 0;

    for _ in 0..config.max_iterations {
        let update = match method {
            IcpMethod::PointToPoint => {
                estimate_point_to_point(&moved, &target.points, &current.pairs)
            }
            IcpMethod::PointToPlane => target.normals.as_ref().and_then(|normals| {
                estimate_point_to_plane(&moved, &target.points, normals, &current.pairs)
            }),
        };
        let Some(update) = update else {
            debug!(
                correspondences = current.pairs.len(),
                "ICP stopped, too few correspondences"
            );
            break;
        };

        transformation = update * transformation;
        iterations += 1;

        let step = transformation.cast::<f32>();
        moved = transform_points(&source.points, &step);
        let next = find_correspondences(&index, &moved, max_dist);

        let converged = (next.fitness - current.fitness).abs() < config.relative_fitness
            && (next.rmse - current.rmse).abs() < config.relative_rmse;
        current = next;
        if converged {
            break;
        }
    }

    debug!(
        fitness = current.fitness,
        rmse = current.rmse,
        iterations,
        "ICP finished"
    );

    Some(ICPResult {
        transformation: transformation.cast::<f32>(),
        fitness: current.fitness,
        inlier_rmse: current.rmse,
        num_iterations: iterations,
    })
}

/// Point-to-plane ICP registration
///
/// Convenience wrapper over [`registration_icp`] with
/// [`IcpMethod::PointToPlane`].
pub fn registration_icp_point_to_plane(
    source: &PointCloud,
    target: &PointCloud,
    max_correspondence_distance: f32,
    init_transformation: &Matrix4<f32>,
    max_iterations: usize,
) -> Option<ICPResult> {
    let config = IcpConfig {
        max_correspondence_distance,
        max_iterations,
        method: IcpMethod::PointToPlane,
        ..Default::default()
    };
    registration_icp(source, target, init_transformation, &config)
}

/// Exponential map from se(3) to SE(3)
fn exponential_map_se3(delta: &Vector6<f64>) -> Matrix4<f64> {
    let v = Vector3::new(delta[0], delta[1], delta[2]);
    let omega = Vector3::new(delta[3], delta[4], delta[5]);
    let theta = omega.norm();

    let (rotation, translation) = if theta < 1e-12 {
        (Matrix3::identity(), v)
    } else {
        let k_cross = skew_symmetric(&(omega / theta));
        let k_cross_sq = k_cross * k_cross;
        let rotation =
            Matrix3::identity() + k_cross * theta.sin() + k_cross_sq * (1.0 - theta.cos());
        let left_jacobian = Matrix3::identity()
            + k_cross * ((1.0 - theta.cos()) / theta)
            + k_cross_sq * ((theta - theta.sin()) / theta);
        (rotation, left_jacobian * v)
    };

    let mut transform = Matrix4::identity();
    transform.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
    transform.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
    transform
}

/// Evaluate registration
///
/// Returns `(fitness, inlier_rmse)` of `source` under `transformation`
/// against `target`.
pub fn evaluate_registration(
    source: &PointCloud,
    target: &PointCloud,
    transformation: &Matrix4<f32>,
    max_correspondence_distance: f32,
) -> (f32, f32) {
    if source.is_empty() || target.is_empty() {
        return (0.0, 0.0);
    }
    let index = PointIndex::new(&target.points);
    let moved = transform_points(&source.points, transformation);
    let c = find_correspondences(&index, &moved, max_correspondence_distance);
    (c.fitness, c.rmse)
}
