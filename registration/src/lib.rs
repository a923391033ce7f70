//! Point cloud registration
//!
//! Pairwise ICP used to align a newly captured wall onto earlier walls:
//! - point-to-point ICP (default)
//! - point-to-plane ICP

pub mod registration;

pub use arc_core::{Error, Result};
pub use registration::{
    evaluate_registration, registration_icp, registration_icp_point_to_plane, ICPResult,
    IcpConfig, IcpMethod,
};
