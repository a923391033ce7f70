use crate::search::PointIndex;
use arc_core::PointCloud;
use nalgebra::{Matrix3, Point3, SymmetricEigen, Vector3};
use rayon::prelude::*;

/// Estimate normals from the `k` nearest neighbours of every point.
///
/// The normal is the eigenvector of the neighbourhood covariance with the
/// smallest eigenvalue. Points with fewer than 3 neighbours get `+Z`.
/// Orientation is arbitrary; see [`orient_normals`].
pub fn estimate_normals(pc: &mut PointCloud, k: usize) {
    if pc.is_empty() {
        return;
    }

    let index = PointIndex::new(&pc.points);
    let points = &pc.points;

    let normals: Vec<Vector3<f32>> = points
        .par_iter()
        .map(|p| {
            let neighbors = index.k_nearest(p, k);
            if neighbors.len() < 3 {
                return Vector3::z();
            }

            let centroid = neighbors
                .iter()
                .fold(Vector3::zeros(), |acc, &j| acc + points[j].coords)
                / neighbors.len() as f32;

            let mut cov = Matrix3::zeros();
            for &j in &neighbors {
                let d = points[j].coords - centroid;
                cov += d * d.transpose();
            }
            cov /= neighbors.len() as f32;

            let eigen = SymmetricEigen::new(cov);
            let min_idx = eigen.eigenvalues.imin();
            let n = eigen.eigenvectors.column(min_idx).into_owned();
            if n.iter().all(|v| v.is_finite()) {
                n
            } else {
                Vector3::z()
            }
        })
        .collect();

    pc.normals = Some(normals);
}

/// Orient normals consistently by propagation over the kNN graph.
///
/// Starting from point 0, each unvisited neighbour is flipped to agree with
/// the point that reached it. Disconnected components are seeded in index
/// order. No-op without normals.
pub fn orient_normals(pc: &mut PointCloud, k: usize) {
    let n = pc.len();
    let Some(mut normals) = pc.normals.take() else {
        return;
    };
    if n < 3 {
        pc.normals = Some(normals);
        return;
    }

    let index = PointIndex::new(&pc.points);
    let mut visited = vec![false; n];

    for seed in 0..n {
        if visited[seed] {
            continue;
        }
        visited[seed] = true;
        let mut stack = vec![seed];

        while let Some(i) = stack.pop() {
            for j in index.k_nearest(&pc.points[i], k) {
                if visited[j] {
                    continue;
                }
                if normals[j].dot(&normals[i]) < 0.0 {
                    normals[j] = -normals[j];
                }
                visited[j] = true;
                stack.push(j);
            }
        }
    }

    pc.normals = Some(normals);
}

/// Flip every normal so it points away from `viewpoint`.
///
/// For a closed room captured from inside, orienting away from the
/// centroid makes all wall normals face outward.
pub fn orient_normals_towards(pc: &mut PointCloud, viewpoint: &Point3<f32>, away: bool) {
    let Some(normals) = pc.normals.as_mut() else {
        return;
    };
    for (p, n) in pc.points.iter().zip(normals.iter_mut()) {
        let to_view = viewpoint - p;
        let facing = n.dot(&to_view) > 0.0;
        if facing == away {
            *n = -*n;
        }
    }
}
