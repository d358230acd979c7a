use std::collections::TryReserveError;

use cloudreg_3d::pointcloud::PointCloudError;

/// Errors raised by the registration pipeline.
///
/// Running out of iterations is not an error; see [`crate::ICPStatus::Exhausted`].
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// A required point cloud is empty.
    #[error("The {role} point cloud is empty")]
    EmptyPointCloud {
        /// Which input was empty, e.g. `"source"` or `"target"`.
        role: &'static str,
    },

    /// The two correspondence sets are not index aligned.
    #[error("Correspondence sets have different lengths: {source_len} != {target_len}")]
    MismatchedLengths {
        /// Number of source points.
        source_len: usize,
        /// Number of target points.
        target_len: usize,
    },

    /// Not enough correspondences to define a rotation.
    #[error("At least {required} correspondences are required, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences.
        required: usize,
        /// Number of correspondences given.
        actual: usize,
    },

    /// All correspondences lie on a single line, the rotation about it is undefined.
    #[error("Correspondences are collinear")]
    CollinearCorrespondences,

    /// The dominant eigenvector could not be normalized into a unit quaternion.
    #[error("Degenerate quaternion with norm {norm}")]
    DegenerateQuaternion {
        /// Norm of the eigenvector.
        norm: f64,
    },

    /// An input contains NaN or infinite values.
    #[error("Input contains non-finite values")]
    NonFiniteInput,

    /// The eigen solver did not produce a usable decomposition.
    #[error("Eigen decomposition failed to converge")]
    EigenDecompositionFailed,

    /// Failed to allocate working memory.
    #[error("Failed to allocate working memory")]
    AllocationFailed(#[from] TryReserveError),

    /// Point cloud error.
    #[error(transparent)]
    PointCloud(#[from] PointCloudError),
}
