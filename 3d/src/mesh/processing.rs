//! Mesh Processing Operations
//!
//! Implements:
//! - Face filtering with vertex compaction
//! - Vertex color transfer from a colored point cloud

use super::TriangleMesh;
use arc_core::PointCloud;
use arc_point_cloud::PointIndex;
use rayon::prelude::*;

/// Keep only faces for which `keep` returns true, then drop vertices no
/// face references. Per-vertex attributes follow their vertices.
pub fn retain_faces<F>(mesh: &mut TriangleMesh, mut keep: F)
where
    F: FnMut(&TriangleMesh, &[usize; 3]) -> bool,
{
    let kept: Vec<[usize; 3]> = mesh
        .faces
        .iter()
        .filter(|f| keep(mesh, f))
        .copied()
        .collect();
    mesh.faces = kept;
    remove_unreferenced_vertices(mesh);
}

/// Drop vertices that no face references and reindex the faces.
pub fn remove_unreferenced_vertices(mesh: &mut TriangleMesh) {
    let mut remap = vec![usize::MAX; mesh.vertices.len()];
    let mut order = Vec::new();

    for face in &mesh.faces {
        for &v in face {
            if remap[v] == usize::MAX {
                remap[v] = order.len();
                order.push(v);
            }
        }
    }
    if order.len() == mesh.vertices.len() && order.iter().enumerate().all(|(i, &v)| i == v) {
        return;
    }

    mesh.vertices = order.iter().map(|&v| mesh.vertices[v]).collect();
    mesh.normals = mesh
        .normals
        .as_ref()
        .map(|n| order.iter().map(|&v| n[v]).collect());
    mesh.colors = mesh
        .colors
        .as_ref()
        .map(|c| order.iter().map(|&v| c[v]).collect());
    for face in mesh.faces.iter_mut() {
        for v in face.iter_mut() {
            *v = remap[*v];
        }
    }
}

/// Color every vertex with the color of its nearest point in `source`.
///
/// No-op when `source` has no colors or no points.
pub fn transfer_vertex_colors(mesh: &mut TriangleMesh, source: &PointCloud) {
    let Some(colors) = source.colors.as_ref() else {
        return;
    };
    if source.is_empty() {
        return;
    }

    let index = PointIndex::new(&source.points);
    let vertex_colors = mesh
        .vertices
        .par_iter()
        .map(|v| {
            index
                .nearest(v)
                .map(|(i, _)| colors[i])
                .unwrap_or_else(nalgebra::Point3::origin)
        })
        .collect();
    mesh.colors = Some(vertex_colors);
}
