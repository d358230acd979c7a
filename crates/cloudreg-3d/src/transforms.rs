use glam::DMat3;
use serde::{Deserialize, Serialize};

use crate::linalg::{self, LinalgError};

/// Error types for the transforms module.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// The rotation axis has zero length.
    #[error("Cannot compute rotation matrix from a zero axis")]
    ZeroAxis,

    /// The quaternion has zero magnitude.
    #[error("Cannot compute rotation matrix from a zero quaternion")]
    ZeroQuaternion,

    /// The matrix is not a rigid homogeneous transform.
    #[error("Matrix is not a rigid transform")]
    NotRigid,
}

/// Compute the rotation matrix from an axis and angle.
///
/// # Arguments
///
/// * `axis` - The axis of rotation. It is normalized internally.
/// * `angle` - The angle of rotation in radians.
///
/// # Returns
///
/// The row-major rotation matrix.
///
/// Example:
///
/// ```
/// use cloudreg_3d::transforms::axis_angle_to_rotation_matrix;
///
/// let axis = [1.0, 0.0, 0.0];
/// let angle = std::f64::consts::PI / 2.0;
/// let rotation = axis_angle_to_rotation_matrix(&axis, angle).unwrap();
/// assert!((rotation[1][2] + 1.0).abs() < 1e-12);
/// ```
pub fn axis_angle_to_rotation_matrix(
    axis: &[f64; 3],
    angle: f64,
) -> Result<[[f64; 3]; 3], TransformError> {
    // normalize the vector
    let axis_norm = {
        let magnitude = (axis[0].powi(2) + axis[1].powi(2) + axis[2].powi(2)).sqrt();
        match magnitude < 1e-10 {
            true => return Err(TransformError::ZeroAxis),
            false => [
                axis[0] / magnitude,
                axis[1] / magnitude,
                axis[2] / magnitude,
            ],
        }
    };

    let x = axis_norm[0];
    let y = axis_norm[1];
    let z = axis_norm[2];

    let c = angle.cos();
    let s = angle.sin();
    let t = 1.0 - c;

    let m00 = c + x * x * t;
    let m11 = c + y * y * t;
    let m22 = c + z * z * t;

    let tmp1 = x * y * t;
    let tmp2 = z * s;

    let m10 = tmp1 + tmp2;
    let m01 = tmp1 - tmp2;

    let tmp3 = x * z * t;
    let tmp4 = y * s;

    let m20 = tmp3 - tmp4;
    let m02 = tmp3 + tmp4;

    let tmp5 = y * z * t;
    let tmp6 = x * s;

    let m12 = tmp5 - tmp6;
    let m21 = tmp5 + tmp6;

    Ok([[m00, m01, m02], [m10, m11, m12], [m20, m21, m22]])
}

/// Convert a quaternion `[q0, q1, q2, q3]` (scalar first) to a rotation matrix.
///
/// The quaternion is normalized before conversion, so any non-zero multiple of
/// a unit quaternion yields the same rotation.
pub fn quaternion_to_rotation_matrix(q: &[f64; 4]) -> Result<[[f64; 3]; 3], TransformError> {
    let magnitude = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if magnitude.is_nan() || magnitude <= 1e-12 {
        return Err(TransformError::ZeroQuaternion);
    }

    let (q0, q1, q2, q3) = (
        q[0] / magnitude,
        q[1] / magnitude,
        q[2] / magnitude,
        q[3] / magnitude,
    );

    Ok([
        [
            q0 * q0 + q1 * q1 - q2 * q2 - q3 * q3,
            2.0 * (q1 * q2 - q0 * q3),
            2.0 * (q1 * q3 + q0 * q2),
        ],
        [
            2.0 * (q1 * q2 + q0 * q3),
            q0 * q0 + q2 * q2 - q1 * q1 - q3 * q3,
            2.0 * (q2 * q3 - q0 * q1),
        ],
        [
            2.0 * (q1 * q3 - q0 * q2),
            2.0 * (q2 * q3 + q0 * q1),
            q0 * q0 + q3 * q3 - q1 * q1 - q2 * q2,
        ],
    ])
}

/// A rigid transform stored as a row-major 4x4 homogeneous matrix.
///
/// The upper-left 3x3 block is the rotation, the last column the translation
/// and the bottom row is always `[0, 0, 0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    matrix: [[f64; 4]; 4],
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Assemble a transform from a rotation matrix and a translation vector.
    pub fn from_rotation_translation(rotation: &[[f64; 3]; 3], translation: &[f64; 3]) -> Self {
        let r = rotation;
        let t = translation;
        Self {
            matrix: [
                [r[0][0], r[0][1], r[0][2], t[0]],
                [r[1][0], r[1][1], r[1][2], t[1]],
                [r[2][0], r[2][1], r[2][2], t[2]],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// A pure translation.
    pub fn from_translation(translation: &[f64; 3]) -> Self {
        let identity = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        Self::from_rotation_translation(&identity, translation)
    }

    /// Build a transform from a homogeneous matrix, checking that it is rigid.
    pub fn from_matrix(matrix: [[f64; 4]; 4], tolerance: f64) -> Result<Self, TransformError> {
        let transform = Self { matrix };
        match transform.is_rigid(tolerance) {
            true => Ok(transform),
            false => Err(TransformError::NotRigid),
        }
    }

    /// The homogeneous matrix.
    #[inline]
    pub fn matrix(&self) -> &[[f64; 4]; 4] {
        &self.matrix
    }

    /// The rotation block.
    pub fn rotation(&self) -> [[f64; 3]; 3] {
        let m = &self.matrix;
        [
            [m[0][0], m[0][1], m[0][2]],
            [m[1][0], m[1][1], m[1][2]],
            [m[2][0], m[2][1], m[2][2]],
        ]
    }

    /// The translation block.
    pub fn translation(&self) -> [f64; 3] {
        [self.matrix[0][3], self.matrix[1][3], self.matrix[2][3]]
    }

    /// Compose two transforms as `self * other`: `other` is applied first.
    pub fn compose(&self, other: &RigidTransform) -> RigidTransform {
        RigidTransform {
            matrix: linalg::matmul44(&self.matrix, &other.matrix),
        }
    }

    /// The inverse transform `[R^T | -R^T t]`.
    pub fn inverse(&self) -> RigidTransform {
        let r = self.rotation();
        let t = self.translation();
        let r_t = [
            [r[0][0], r[1][0], r[2][0]],
            [r[0][1], r[1][1], r[2][1]],
            [r[0][2], r[1][2], r[2][2]],
        ];
        let t_inv = [
            -linalg::dot_product3(&r_t[0], &t),
            -linalg::dot_product3(&r_t[1], &t),
            -linalg::dot_product3(&r_t[2], &t),
        ];
        Self::from_rotation_translation(&r_t, &t_inv)
    }

    /// Apply the transform to a single point.
    #[inline]
    pub fn apply(&self, point: &[f64; 3]) -> [f64; 3] {
        let m = &self.matrix;
        [
            m[0][0] * point[0] + m[0][1] * point[1] + m[0][2] * point[2] + m[0][3],
            m[1][0] * point[0] + m[1][1] * point[1] + m[1][2] * point[2] + m[1][3],
            m[2][0] * point[0] + m[2][1] * point[1] + m[2][2] * point[2] + m[2][3],
        ]
    }

    /// Apply the transform to a batch of points into a pre-allocated buffer.
    pub fn apply_points(
        &self,
        src_points: &[[f64; 3]],
        dst_points: &mut [[f64; 3]],
    ) -> Result<(), LinalgError> {
        linalg::transform_points3d(
            src_points,
            &self.rotation(),
            &self.translation(),
            dst_points,
        )
    }

    /// Check that the rotation block is orthonormal with determinant +1 and
    /// that the bottom row is `[0, 0, 0, 1]`, all within `tolerance`.
    pub fn is_rigid(&self, tolerance: f64) -> bool {
        let bottom = [0.0, 0.0, 0.0, 1.0];
        if self.matrix[3]
            .iter()
            .zip(bottom.iter())
            .any(|(a, b)| (a - b).abs() > tolerance)
        {
            return false;
        }

        // glam is column-major, so the row arrays land transposed
        let r = DMat3::from_cols_array_2d(&self.rotation()).transpose();
        let should_be_identity = r * r.transpose();
        should_be_identity.abs_diff_eq(DMat3::IDENTITY, tolerance)
            && (r.determinant() - 1.0).abs() <= tolerance
    }
}
