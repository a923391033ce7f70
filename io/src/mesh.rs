//! Triangle Mesh Data Structure
//!
//! `TriangleMesh` is defined in arc-3d; re-exported here so callers doing
//! only I/O need a single import.

pub use arc_3d::mesh::TriangleMesh;
