use nalgebra::{Matrix3, Matrix4, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Pinhole camera intrinsics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, width: u32, height: u32) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        }
    }

    /// Principal point at the image midpoint (`W/2`, `H/2`).
    pub fn centered(fx: f64, fy: f64, width: u32, height: u32) -> Self {
        Self::new(fx, fy, width as f64 / 2.0, height as f64 / 2.0, width, height)
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    pub fn project(&self, point: &Point3<f64>) -> Point2<f64> {
        let x = point.x / point.z;
        let y = point.y / point.z;
        Point2::new(x * self.fx + self.cx, y * self.fy + self.cy)
    }

    pub fn unproject(&self, pixel: Point2<f64>, depth: f64) -> Point3<f64> {
        let x = (pixel.x - self.cx) / self.fx;
        let y = (pixel.y - self.cy) / self.fy;
        Point3::new(x * depth, y * depth, depth)
    }
}

/// Plane `ax + by + cz + d = 0` with `(a, b, c)` a unit normal.
///
/// Orientation is whatever the fit produced; it is not guaranteed to point
/// away from the camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
}

impl Plane {
    /// Build from raw coefficients, normalizing the normal. `None` if the normal vanishes.
    pub fn from_coefficients(coefficients: [f32; 4]) -> Option<Self> {
        let [a, b, c, d] = coefficients;
        let norm = (a * a + b * b + c * c).sqrt();
        if !norm.is_finite() || norm < 1e-12 {
            return None;
        }
        Some(Self {
            a: a / norm,
            b: b / norm,
            c: c / norm,
            d: d / norm,
        })
    }

    /// Plane through three points; `None` when they are collinear.
    pub fn from_points(p1: &Point3<f32>, p2: &Point3<f32>, p3: &Point3<f32>) -> Option<Self> {
        let normal = (p2 - p1).cross(&(p3 - p1));
        let len = normal.norm();
        if !len.is_finite() || len < 1e-12 {
            return None;
        }
        let n = normal / len;
        Some(Self {
            a: n.x,
            b: n.y,
            c: n.z,
            d: -n.dot(&p1.coords),
        })
    }

    pub fn normal(&self) -> Vector3<f32> {
        Vector3::new(self.a, self.b, self.c)
    }

    pub fn coefficients(&self) -> [f32; 4] {
        [self.a, self.b, self.c, self.d]
    }

    pub fn signed_distance(&self, point: &Point3<f32>) -> f32 {
        self.a * point.x + self.b * point.y + self.c * point.z + self.d
    }

    pub fn distance(&self, point: &Point3<f32>) -> f32 {
        self.signed_distance(point).abs()
    }
}

/// Homogeneous transform from a rotation and a translation.
pub fn rigid_transform(rotation: &Matrix3<f32>, translation: &Vector3<f32>) -> Matrix4<f32> {
    let mut m = Matrix4::identity();
    m.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
    m.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
    m
}

/// Rotation angle (radians) of the upper-left 3×3 block of a rigid transform.
pub fn rotation_angle(transform: &Matrix4<f32>) -> f32 {
    let trace = transform[(0, 0)] + transform[(1, 1)] + transform[(2, 2)];
    ((trace - 1.0) / 2.0).clamp(-1.0, 1.0).acos()
}

pub fn is_identity(transform: &Matrix4<f32>, eps: f32) -> bool {
    (transform - Matrix4::identity()).amax() <= eps
}

pub fn skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v[2], v[1], v[2], 0.0, -v[0], -v[1], v[0], 0.0)
}
