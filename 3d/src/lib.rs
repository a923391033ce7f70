//! 3D surface reconstruction for scanned rooms.
//!
//! - `mesh`: triangle mesh, Poisson reconstruction, mesh processing
//! - `async_ops`: background reconstruction with cancellation

pub mod async_ops;
pub mod mesh;

pub use arc_core::{Error, PointCloud, Result};
pub use async_ops::{ReconstructionJob, ReconstructionWorker};
pub use mesh::reconstruction::{
    poisson_reconstruction, InsufficientData, NormalOrientation, ReconstructionConfig,
    RoomMeshOutcome, SurfaceReconstructor,
};
pub use mesh::TriangleMesh;
