use arc_core::PointCloud;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;

/// Downsample a point cloud with a voxel grid.
///
/// Returns one point per occupied voxel: the centroid of its points, with
/// colors averaged and normals averaged then renormalized. Output order is
/// sorted by voxel key, so the result is deterministic.
pub fn voxel_down_sample(pc: &PointCloud, voxel_size: f32) -> PointCloud {
    if voxel_size.is_nan() || voxel_size <= 0.0 || pc.is_empty() {
        return pc.clone();
    }

    let n = pc.len();
    let mut keys: Vec<((i64, i64, i64), usize)> = pc
        .points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let key = (
                (p.x / voxel_size).floor() as i64,
                (p.y / voxel_size).floor() as i64,
                (p.z / voxel_size).floor() as i64,
            );
            (key, i)
        })
        .collect();

    if n > 10_000 {
        keys.par_sort_unstable();
    } else {
        keys.sort_unstable();
    }

    let mut points = Vec::new();
    let mut colors = pc.colors.as_ref().map(|_| Vec::new());
    let mut normals = pc.normals.as_ref().map(|_| Vec::new());

    for group in keys.chunk_by(|a, b| a.0 == b.0) {
        let factor = 1.0 / group.len() as f32;

        let sum_p = group
            .iter()
            .fold(Vector3::zeros(), |acc, &(_, i)| acc + pc.points[i].coords);
        points.push(Point3::from(sum_p * factor));

        if let (Some(out), Some(src)) = (colors.as_mut(), pc.colors.as_ref()) {
            let sum_c = group
                .iter()
                .fold(Vector3::zeros(), |acc, &(_, i)| acc + src[i].coords);
            out.push(Point3::from(sum_c * factor));
        }
        if let (Some(out), Some(src)) = (normals.as_mut(), pc.normals.as_ref()) {
            let sum_n: Vector3<f32> = group.iter().fold(Vector3::zeros(), |acc, &(_, i)| acc + src[i]);
            let norm = sum_n.norm();
            out.push(if norm > 1e-12 { sum_n / norm } else { sum_n });
        }
    }

    PointCloud {
        points,
        colors,
        normals,
    }
}
