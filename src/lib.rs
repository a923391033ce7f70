//! Incremental room reconstruction from handheld wall scans.
//!
//! - [`ArcScanner`]: per-frame processing, wall capture, room mesh export
//! - [`WallStitcher`]: pairwise registration of walls into a global cloud
//! - [`ScannerConfig`]: every tunable, loadable from JSON
//!
//! The geometry, registration, reconstruction, I/O and detection layers are
//! re-exported from their crates.

pub mod config;
pub mod scanner;
pub mod stitching;

pub use arc_3d as reconstruction;
pub use arc_core as core;
pub use arc_io as io;
pub use arc_objdetect as objdetect;
pub use arc_point_cloud as point_cloud;
pub use arc_registration as registration;

pub use config::{SamplingPolicy, ScannerConfig};
pub use scanner::{ArcScanner, CaptureOutcome, DepthEstimator, FrameResult};
pub use stitching::{GlobalPointCloud, RegistrationOutcome, StitcherConfig, WallScan, WallStitcher};

pub type Result<T> = std::result::Result<T, ScanError>;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    Geometry(#[from] arc_core::Error),

    #[error("Detection error: {0}")]
    Detection(#[from] arc_objdetect::DetectionError),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Initialize the global Rayon pool shared by every CPU-parallel stage and
/// return its worker count.
///
/// Call this once at application startup. Repeated calls return the first
/// initialization result.
///
/// Priority order:
/// 1. explicit `num_threads`
/// 2. `ARC_CPU_THREADS` env var
/// 3. Rayon default
pub fn init_thread_pool(num_threads: Option<usize>) -> Result<usize> {
    let threads = arc_core::init_global_thread_pool(num_threads)?;
    tracing::info!(threads, "Global thread pool ready");
    Ok(threads)
}
