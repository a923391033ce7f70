//! Point cloud operations for wall scanning.
//!
//! - `search`: R*-tree nearest-neighbour index
//! - `filtering`: voxel downsampling
//! - `normals`: PCA normal estimation and orientation
//! - `segmentation`: RANSAC wall-plane extraction

pub mod filtering;
pub mod normals;
pub mod search;
pub mod segmentation;

pub use filtering::voxel_down_sample;
pub use normals::{estimate_normals, orient_normals, orient_normals_towards};
pub use search::PointIndex;
pub use segmentation::{
    extract_wall_plane, segment_plane, NoPlaneReason, PlaneEstimator, PlaneExtraction,
    PlaneExtractorConfig,
};
