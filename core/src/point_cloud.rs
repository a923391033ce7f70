use nalgebra::{Matrix3, Matrix4, Point3, Scalar, Vector3};

/// Point set with optional per-point color (RGB in `[0, 1]`) and normals.
#[derive(Debug, Clone, Default)]
pub struct PointCloud<T: Scalar = f32> {
    pub points: Vec<Point3<T>>,
    pub colors: Option<Vec<Point3<T>>>,
    pub normals: Option<Vec<Vector3<T>>>,
}

impl<T: Scalar> PointCloud<T> {
    pub fn new(points: Vec<Point3<T>>) -> Self {
        Self {
            points,
            colors: None,
            normals: None,
        }
    }

    pub fn with_colors(mut self, colors: Vec<Point3<T>>) -> crate::Result<Self> {
        if colors.len() == self.points.len() {
            self.colors = Some(colors);
            Ok(self)
        } else {
            Err(crate::Error::InvalidInput(format!(
                "Color count {} does not match point count {}",
                colors.len(),
                self.points.len()
            )))
        }
    }

    pub fn with_normals(mut self, normals: Vec<Vector3<T>>) -> crate::Result<Self> {
        if normals.len() == self.points.len() {
            self.normals = Some(normals);
            Ok(self)
        } else {
            Err(crate::Error::InvalidInput(format!(
                "Normal count {} does not match point count {}",
                normals.len(),
                self.points.len()
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn has_colors(&self) -> bool {
        self.colors.is_some()
    }

    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    /// Sub-cloud made of the points at `indices`, in the given order.
    ///
    /// Out-of-range indices are ignored.
    pub fn select_by_index(&self, indices: &[usize]) -> Self {
        let keep: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| i < self.points.len())
            .collect();

        Self {
            points: keep.iter().map(|&i| self.points[i].clone()).collect(),
            colors: self
                .colors
                .as_ref()
                .map(|c| keep.iter().map(|&i| c[i].clone()).collect()),
            normals: self
                .normals
                .as_ref()
                .map(|n| keep.iter().map(|&i| n[i].clone()).collect()),
        }
    }

    /// Append another cloud's points.
    ///
    /// An attribute survives only when both clouds carry it; appending into an
    /// empty cloud adopts the other cloud's attributes.
    pub fn extend_from(&mut self, other: &PointCloud<T>) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other.clone();
            return;
        }

        self.colors = match (self.colors.take(), other.colors.as_ref()) {
            (Some(mut mine), Some(theirs)) => {
                mine.extend(theirs.iter().cloned());
                Some(mine)
            }
            _ => None,
        };
        self.normals = match (self.normals.take(), other.normals.as_ref()) {
            (Some(mut mine), Some(theirs)) => {
                mine.extend(theirs.iter().cloned());
                Some(mine)
            }
            _ => None,
        };
        self.points.extend(other.points.iter().cloned());
    }
}

impl PointCloud<f32> {
    /// Apply a rigid 4×4 transform in place. Normals are rotated, colors untouched.
    pub fn transform(&mut self, transform: &Matrix4<f32>) {
        for p in self.points.iter_mut() {
            *p = transform.transform_point(p);
        }
        if let Some(normals) = self.normals.as_mut() {
            let rotation: Matrix3<f32> = transform.fixed_view::<3, 3>(0, 0).into_owned();
            for n in normals.iter_mut() {
                *n = rotation * *n;
            }
        }
    }

    /// Transformed copy; `self` is left untouched.
    pub fn transformed(&self, transform: &Matrix4<f32>) -> Self {
        let mut out = self.clone();
        out.transform(transform);
        out
    }

    /// Axis-aligned bounds, or `None` for an empty cloud.
    pub fn bounds(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        let first = *self.points.first()?;
        let mut min = first;
        let mut max = first;

        for p in &self.points {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }

        Some((min, max))
    }

    pub fn centroid(&self) -> Option<Point3<f32>> {
        if self.points.is_empty() {
            return None;
        }
        let sum: Vector3<f64> = self
            .points
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.coords.cast::<f64>());
        Some(Point3::from((sum / self.points.len() as f64).cast::<f32>()))
    }
}

pub type PointCloudf32 = PointCloud<f32>;
pub type PointCloudf64 = PointCloud<f64>;
