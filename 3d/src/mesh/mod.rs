//! Triangle Mesh Data Structure and Processing

use arc_core::point_cloud::PointCloud;
use nalgebra::{Point3, Vector3};

/// Triangle mesh with vertices and face indices
#[derive(Debug, Clone)]
pub struct TriangleMesh {
    pub vertices: Vec<Point3<f32>>,
    pub faces: Vec<[usize; 3]>,
    pub normals: Option<Vec<Vector3<f32>>>,
    /// Per-vertex RGB in `[0, 1]`.
    pub colors: Option<Vec<Point3<f32>>>,
}

impl TriangleMesh {
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
            normals: None,
            colors: None,
        }
    }

    pub fn with_vertices_and_faces(vertices: Vec<Point3<f32>>, faces: Vec<[usize; 3]>) -> Self {
        Self {
            vertices,
            faces,
            normals: None,
            colors: None,
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Compute face normals. Degenerate faces get a zero normal.
    pub fn compute_face_normals(&self) -> Vec<Vector3<f32>> {
        self.faces
            .iter()
            .map(|face| {
                let v0 = self.vertices[face[0]];
                let v1 = self.vertices[face[1]];
                let v2 = self.vertices[face[2]];

                (v1 - v0)
                    .cross(&(v2 - v0))
                    .try_normalize(1e-12)
                    .unwrap_or_else(Vector3::zeros)
            })
            .collect()
    }

    /// Compute vertex normals by averaging adjacent face normals
    pub fn compute_vertex_normals(&mut self) {
        let mut vertex_normals: Vec<Vector3<f32>> = vec![Vector3::zeros(); self.vertices.len()];
        let face_normals = self.compute_face_normals();

        for (face, normal) in self.faces.iter().zip(face_normals.iter()) {
            for &vertex_idx in face.iter() {
                vertex_normals[vertex_idx] += normal;
            }
        }

        for normal in vertex_normals.iter_mut() {
            *normal = normal.try_normalize(1e-12).unwrap_or_else(Vector3::zeros);
        }

        self.normals = Some(vertex_normals);
    }

    /// Axis-aligned bounds, `None` without vertices.
    pub fn bounds(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        self.to_point_cloud().bounds()
    }

    /// Calculate surface area
    pub fn surface_area(&self) -> f32 {
        self.faces
            .iter()
            .map(|face| {
                let v0 = self.vertices[face[0]];
                let e1 = self.vertices[face[1]] - v0;
                let e2 = self.vertices[face[2]] - v0;
                e1.cross(&e2).norm() * 0.5
            })
            .sum()
    }

    /// Convert to point cloud (vertex positions and colors)
    pub fn to_point_cloud(&self) -> PointCloud {
        PointCloud {
            points: self.vertices.clone(),
            colors: self.colors.clone(),
            normals: self.normals.clone(),
        }
    }
}

impl Default for TriangleMesh {
    fn default() -> Self {
        Self::new()
    }
}

pub mod poisson;
pub mod processing;
pub mod reconstruction;
