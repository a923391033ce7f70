//! Core types shared by the wall-scanning crates.
//!
//! - [`PointCloud`]: colored/oriented point sets
//! - [`DepthMap`] and [`back_project`]: pinhole back-projection of normalized depth
//! - [`Plane`] and [`CameraIntrinsics`]: geometric primitives
//! - [`Ransac`]: generic robust estimation engine

pub mod depth;
pub mod geometry;
pub mod point_cloud;
pub mod robust;
pub mod runtime;

pub use depth::{back_project, BackProjectionConfig, DepthMap};
pub use geometry::{is_identity, rigid_transform, rotation_angle, skew_symmetric, CameraIntrinsics, Plane};
pub use point_cloud::PointCloud;
pub use robust::{Ransac, RobustConfig, RobustModel, RobustResult};
pub use runtime::{init_global_thread_pool, resolve_thread_count, CPU_THREADS_ENV};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
