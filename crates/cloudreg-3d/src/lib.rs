#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// I/O utilities for reading and writing point sets.
pub mod io;

/// Linear algebra utilities.
pub mod linalg;

/// Distance and centroid operations on raw points.
pub mod ops;

/// Point set with a cached centroid.
pub mod pointcloud;

/// Rigid transforms and rotation conversions.
pub mod transforms;
