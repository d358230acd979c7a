#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Rigid transform estimation from paired points.
pub mod alignment;

/// Matching source points to target points.
pub mod correspondence;

/// Symmetric 4x4 eigen solvers.
pub mod eigen;

mod error;
pub use error::RegistrationError;

mod icp;
pub use icp::*;

/// Spatial index over a point cloud.
pub mod kd_tree;
