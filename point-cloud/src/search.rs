//! Nearest-neighbour index over a point set, backed by an R*-tree.

use nalgebra::Point3;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

#[derive(Debug, Clone)]
struct IndexedPoint(usize, Point3<f32>);

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f32; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.1.x, self.1.y, self.1.z])
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f32; 3]) -> f32 {
        let dx = self.1.x - point[0];
        let dy = self.1.y - point[1];
        let dz = self.1.z - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

/// Spatial index returning indices into the slice it was built from.
pub struct PointIndex {
    tree: RTree<IndexedPoint>,
}

impl PointIndex {
    pub fn new(points: &[Point3<f32>]) -> Self {
        let wrappers = points
            .iter()
            .enumerate()
            .map(|(i, p)| IndexedPoint(i, *p))
            .collect();
        Self {
            tree: RTree::bulk_load(wrappers),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Closest point as `(index, squared distance)`.
    pub fn nearest(&self, query: &Point3<f32>) -> Option<(usize, f32)> {
        let q = [query.x, query.y, query.z];
        self.tree
            .nearest_neighbor(&q)
            .map(|p| (p.0, p.distance_2(&q)))
    }

    /// Indices of the `k` closest points, nearest first (the query point itself included if indexed).
    pub fn k_nearest(&self, query: &Point3<f32>, k: usize) -> Vec<usize> {
        let q = [query.x, query.y, query.z];
        self.tree
            .nearest_neighbor_iter(&q)
            .take(k)
            .map(|p| p.0)
            .collect()
    }

    /// Indices of all points within `radius` of `query`.
    pub fn within_radius(&self, query: &Point3<f32>, radius: f32) -> Vec<usize> {
        let q = [query.x, query.y, query.z];
        self.tree
            .locate_within_distance(q, radius * radius)
            .map(|p| p.0)
            .collect()
    }
}
