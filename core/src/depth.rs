//! Depth maps and pinhole back-projection.
//!
//! A depth estimator produces per-pixel depth normalized to `[0, 1]`. The
//! back-projection scales it into a metric-like unit and lifts every valid
//! pixel to camera space.

use crate::geometry::CameraIntrinsics;
use crate::point_cloud::PointCloud;
use crate::{Error, Result};
use image::RgbImage;
use nalgebra::{Point2, Point3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Row-major `H×W` depth buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl DepthMap {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(Error::DimensionMismatch(format!(
                "Depth buffer has {} values, expected {}x{} = {}",
                data.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> f32) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Min-max normalize raw network output into `[0, 1]`.
    ///
    /// A constant input maps to all zeros. Non-finite values are treated as 0.
    pub fn normalized(width: u32, height: u32, raw: Vec<f32>) -> Result<Self> {
        let mut map = Self::new(width, height, raw)?;
        let (min, max) = map
            .data
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;
        for v in map.data.iter_mut() {
            *v = if v.is_finite() && range > f32::EPSILON {
                (*v - min) / range
            } else {
                0.0
            };
        }
        Ok(map)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[y as usize * self.width as usize + x as usize]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// Parameters of the depth-to-3D lift.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackProjectionConfig {
    /// Focal length along x, in pixels.
    pub fx: f64,
    /// Focal length along y, in pixels.
    pub fy: f64,
    /// Multiplier from normalized depth to world units.
    pub depth_scale: f32,
    /// Points at or beyond this depth (world units) are discarded.
    pub max_depth: f32,
}

impl Default for BackProjectionConfig {
    fn default() -> Self {
        Self {
            fx: 525.0,
            fy: 525.0,
            depth_scale: 1000.0,
            max_depth: 10000.0,
        }
    }
}

/// Back-project a normalized depth map to a colored point cloud.
///
/// The principal point is the image midpoint. Pixels whose scaled depth is
/// non-positive, non-finite or `>= max_depth` are dropped together with their
/// color. When `rgb` is given it must match the depth map's dimensions.
pub fn back_project(
    depth: &DepthMap,
    rgb: Option<&RgbImage>,
    config: &BackProjectionConfig,
) -> Result<PointCloud> {
    if let Some(img) = rgb {
        if img.width() != depth.width() || img.height() != depth.height() {
            return Err(Error::DimensionMismatch(format!(
                "RGB image is {}x{} but depth map is {}x{}",
                img.width(),
                img.height(),
                depth.width(),
                depth.height()
            )));
        }
    }

    let intrinsics = CameraIntrinsics::centered(config.fx, config.fy, depth.width(), depth.height());

    let rows: Vec<Vec<(Point3<f32>, Point3<f32>)>> = (0..depth.height())
        .into_par_iter()
        .map(|v| {
            let mut row = Vec::new();
            for u in 0..depth.width() {
                let z = depth.get(u, v) * config.depth_scale;
                if !(z.is_finite() && z > 0.0 && z < config.max_depth) {
                    continue;
                }
                let p = intrinsics.unproject(Point2::new(u as f64, v as f64), z as f64);
                let color = match rgb {
                    Some(img) => {
                        let px = img.get_pixel(u, v);
                        Point3::new(
                            px[0] as f32 / 255.0,
                            px[1] as f32 / 255.0,
                            px[2] as f32 / 255.0,
                        )
                    }
                    None => Point3::origin(),
                };
                row.push((p.cast::<f32>(), color));
            }
            row
        })
        .collect();

    let (points, colors): (Vec<_>, Vec<_>) = rows.into_iter().flatten().unzip();
    let cloud = PointCloud::new(points);
    if rgb.is_some() {
        cloud.with_colors(colors)
    } else {
        Ok(cloud)
    }
}
