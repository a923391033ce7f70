//! 3D File I/O Module
//!
//! Reads and writes point clouds and triangle meshes as ASCII PLY
//! (Polygon File Format).

pub mod mesh;
pub mod ply;

pub use mesh::TriangleMesh;
pub use ply::{
    load_ply, load_ply_mesh, read_ply, read_ply_mesh, save_ply, save_ply_mesh, write_ply,
    write_ply_mesh,
};

pub use arc_core::{Error, Result};
