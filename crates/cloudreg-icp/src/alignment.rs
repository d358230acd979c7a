use cloudreg_3d::{
    ops::squared_distance,
    pointcloud::PointCloud,
    transforms::{quaternion_to_rotation_matrix, RigidTransform},
};

use crate::{
    eigen::{FaerEigenSolver, SymmetricEigenSolver},
    error::RegistrationError,
};

/// Minimum number of correspondences that can define a rotation.
pub const MIN_CORRESPONDENCES: usize = 3;

const COLLINEAR_TOLERANCE: f64 = 1e-10;
const QUATERNION_NORM_EPS: f64 = 1e-12;

/// Cross-covariance of two index-paired clouds about their centroids.
///
/// `S[i][j] = 1/n * sum_k (s_k[i] - cs[i]) * (t_k[j] - ct[j])`
pub fn cross_covariance(
    source: &PointCloud,
    target: &PointCloud,
) -> Result<[[f64; 3]; 3], RegistrationError> {
    if source.len() != target.len() {
        return Err(RegistrationError::MismatchedLengths {
            source_len: source.len(),
            target_len: target.len(),
        });
    }
    let cs = source
        .centroid()
        .ok_or(RegistrationError::EmptyPointCloud { role: "source" })?;
    let ct = target
        .centroid()
        .ok_or(RegistrationError::EmptyPointCloud { role: "target" })?;

    let mut s = [[0.0; 3]; 3];
    for (p, q) in source.points().iter().zip(target.points().iter()) {
        let a = [p[0] - cs[0], p[1] - cs[1], p[2] - cs[2]];
        let b = [q[0] - ct[0], q[1] - ct[1], q[2] - ct[2]];
        for (i, row) in s.iter_mut().enumerate() {
            for (j, val) in row.iter_mut().enumerate() {
                *val += a[i] * b[j];
            }
        }
    }

    let n = source.len() as f64;
    s.iter_mut().flatten().for_each(|v| *v /= n);
    Ok(s)
}

/// The symmetric 4x4 matrix whose dominant eigenvector is the optimal rotation
/// quaternion (scalar first) for a cross-covariance `s`.
pub fn quaternion_matrix(s: &[[f64; 3]; 3]) -> [[f64; 4]; 4] {
    let trace = s[0][0] + s[1][1] + s[2][2];
    // independent entries of the antisymmetric part S - S^T
    let a12 = s[1][2] - s[2][1];
    let a20 = s[2][0] - s[0][2];
    let a01 = s[0][1] - s[1][0];

    let s01 = s[0][1] + s[1][0];
    let s02 = s[0][2] + s[2][0];
    let s12 = s[1][2] + s[2][1];

    [
        [trace, a12, a20, a01],
        [a12, 2.0 * s[0][0] - trace, s01, s02],
        [a20, s01, 2.0 * s[1][1] - trace, s12],
        [a01, s02, s12, 2.0 * s[2][2] - trace],
    ]
}

// Whether all points lie on one line through their centroid, coincident
// points included.
fn is_collinear(pointcloud: &PointCloud) -> bool {
    let Some(c) = pointcloud.centroid() else {
        return true;
    };

    let points = pointcloud.points();
    let Some(far) = points
        .iter()
        .max_by(|a, b| squared_distance(a, &c).total_cmp(&squared_distance(b, &c)))
    else {
        return true;
    };
    let d = [far[0] - c[0], far[1] - c[1], far[2] - c[2]];
    let d_sq = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
    if d_sq == 0.0 {
        return true;
    }

    let limit = COLLINEAR_TOLERANCE * COLLINEAR_TOLERANCE * d_sq * d_sq;
    points.iter().all(|p| {
        let v = [p[0] - c[0], p[1] - c[1], p[2] - c[2]];
        let cross = [
            v[1] * d[2] - v[2] * d[1],
            v[2] * d[0] - v[0] * d[2],
            v[0] * d[1] - v[1] * d[0],
        ];
        cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2] <= limit
    })
}

/// Estimate the rigid transform mapping `source` onto `target`.
///
/// Uses [`FaerEigenSolver`]; see [`estimate_rigid_alignment_with`].
pub fn estimate_rigid_alignment(
    source: &PointCloud,
    target: &PointCloud,
) -> Result<RigidTransform, RegistrationError> {
    estimate_rigid_alignment_with(source, target, &FaerEigenSolver)
}

/// Estimate the rigid transform mapping `source` onto `target` in the
/// least-squares sense, with the closed-form unit quaternion method.
///
/// # Arguments
///
/// * `source` - The source points.
/// * `target` - The target points, paired with `source` by index.
/// * `solver` - Solves the 4x4 symmetric eigenproblem.
///
/// # Errors
///
/// Fails when the clouds differ in length, hold fewer than three points, are
/// collinear, contain non-finite values, or yield a degenerate quaternion.
pub fn estimate_rigid_alignment_with<S: SymmetricEigenSolver + ?Sized>(
    source: &PointCloud,
    target: &PointCloud,
    solver: &S,
) -> Result<RigidTransform, RegistrationError> {
    if source.len() != target.len() {
        return Err(RegistrationError::MismatchedLengths {
            source_len: source.len(),
            target_len: target.len(),
        });
    }
    if source.len() < MIN_CORRESPONDENCES {
        return Err(RegistrationError::InsufficientCorrespondences {
            required: MIN_CORRESPONDENCES,
            actual: source.len(),
        });
    }
    if source
        .points()
        .iter()
        .chain(target.points())
        .flatten()
        .any(|v| !v.is_finite())
    {
        return Err(RegistrationError::NonFiniteInput);
    }
    if is_collinear(source) || is_collinear(target) {
        return Err(RegistrationError::CollinearCorrespondences);
    }

    let s = cross_covariance(source, target)?;
    let q_mat = quaternion_matrix(&s);

    let (_, q) = solver.solve(&q_mat)?.dominant();
    let norm = q.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm.is_nan() || norm < QUATERNION_NORM_EPS {
        return Err(RegistrationError::DegenerateQuaternion { norm });
    }

    let rotation = quaternion_to_rotation_matrix(&q)
        .map_err(|_| RegistrationError::DegenerateQuaternion { norm })?;

    let cs = source
        .centroid()
        .ok_or(RegistrationError::EmptyPointCloud { role: "source" })?;
    let ct = target
        .centroid()
        .ok_or(RegistrationError::EmptyPointCloud { role: "target" })?;
    let translation = [
        ct[0] - (rotation[0][0] * cs[0] + rotation[0][1] * cs[1] + rotation[0][2] * cs[2]),
        ct[1] - (rotation[1][0] * cs[0] + rotation[1][1] * cs[1] + rotation[1][2] * cs[2]),
        ct[2] - (rotation[2][0] * cs[0] + rotation[2][1] * cs[1] + rotation[2][2] * cs[2]),
    ];

    Ok(RigidTransform::from_rotation_translation(
        &rotation,
        &translation,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eigen::JacobiEigenSolver;
    use approx::assert_relative_eq;
    use cloudreg_3d::transforms::axis_angle_to_rotation_matrix;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_cloud(rng: &mut StdRng, num_points: usize) -> PointCloud {
        (0..num_points)
            .map(|_| {
                [
                    rng.random_range(-5.0..5.0),
                    rng.random_range(-5.0..5.0),
                    rng.random_range(-5.0..5.0),
                ]
            })
            .collect()
    }

    fn assert_transform_eq(a: &RigidTransform, b: &RigidTransform, epsilon: f64) {
        for (ra, rb) in a.matrix().iter().zip(b.matrix().iter()) {
            for (va, vb) in ra.iter().zip(rb.iter()) {
                assert_relative_eq!(va, vb, epsilon = epsilon);
            }
        }
    }

    #[test]
    fn test_recovers_known_transform() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = StdRng::seed_from_u64(9);
        let source = random_cloud(&mut rng, 50);

        let rotation = axis_angle_to_rotation_matrix(&[0.3, -1.0, 0.5], 1.2)?;
        let expected = RigidTransform::from_rotation_translation(&rotation, &[0.5, -2.0, 4.0]);
        let target = source.transformed(&expected)?;

        let estimated = estimate_rigid_alignment(&source, &target)?;
        assert_transform_eq(&estimated, &expected, 1e-6);
        assert!(estimated.is_rigid(1e-9));

        let solver = JacobiEigenSolver::default();
        let estimated = estimate_rigid_alignment_with(&source, &target, &solver)?;
        assert_transform_eq(&estimated, &expected, 1e-6);
        Ok(())
    }

    #[test]
    fn test_large_rotation() -> Result<(), Box<dyn std::error::Error>> {
        let source = PointCloud::new(vec![
            [1.0, 0.0, 0.0],
            [0.0, 2.0, 0.0],
            [0.0, 0.0, 3.0],
            [1.0, 1.0, 1.0],
        ]);
        // half turn: the quaternion scalar part is zero
        let rotation = axis_angle_to_rotation_matrix(&[0.0, 1.0, 0.0], std::f64::consts::PI)?;
        let expected = RigidTransform::from_rotation_translation(&rotation, &[0.0, 0.0, 1.0]);
        let target = source.transformed(&expected)?;

        let estimated = estimate_rigid_alignment(&source, &target)?;
        assert_transform_eq(&estimated, &expected, 1e-6);
        Ok(())
    }

    #[test]
    fn test_identical_sets() -> Result<(), RegistrationError> {
        let mut rng = StdRng::seed_from_u64(4);
        let source = random_cloud(&mut rng, 20);
        let estimated = estimate_rigid_alignment(&source, &source)?;
        assert_transform_eq(&estimated, &RigidTransform::identity(), 1e-9);
        Ok(())
    }

    #[test]
    fn test_cross_covariance() -> Result<(), RegistrationError> {
        let source = PointCloud::new(vec![[1.0, 0.0, 0.0], [-1.0, 0.0, 0.0]]);
        let target = PointCloud::new(vec![[0.0, 2.0, 0.0], [0.0, -2.0, 0.0]]);
        let s = cross_covariance(&source, &target)?;
        assert_eq!(s, [[0.0, 2.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]]);

        let q = quaternion_matrix(&s);
        for i in 0..4 {
            for j in 0..4 {
                assert_eq!(q[i][j], q[j][i]);
            }
        }
        // the trace of Q is zero by construction
        assert_eq!(q[0][0] + q[1][1] + q[2][2] + q[3][3], 0.0);
        Ok(())
    }

    #[test]
    fn test_mismatched_lengths() -> Result<(), Box<dyn std::error::Error>> {
        let source = PointCloud::new(vec![[0.0; 3]; 4]);
        let target = PointCloud::new(vec![[0.0; 3]; 3]);
        assert!(matches!(
            estimate_rigid_alignment(&source, &target),
            Err(RegistrationError::MismatchedLengths {
                source_len: 4,
                target_len: 3
            })
        ));

        // plain lengths, no underlying cause
        let err = cross_covariance(&source, &target).err().ok_or("expected an error")?;
        assert_eq!(
            err.to_string(),
            "Correspondence sets have different lengths: 4 != 3"
        );
        assert!(std::error::Error::source(&err).is_none());
        Ok(())
    }

    #[test]
    fn test_insufficient_correspondences() {
        let source = PointCloud::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        assert!(matches!(
            estimate_rigid_alignment(&source, &source),
            Err(RegistrationError::InsufficientCorrespondences {
                required: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_collinear_correspondences() {
        let line = PointCloud::new(vec![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [3.0, 3.0, 3.0]]);
        let plane = PointCloud::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        assert!(matches!(
            estimate_rigid_alignment(&line, &plane),
            Err(RegistrationError::CollinearCorrespondences)
        ));
        assert!(matches!(
            estimate_rigid_alignment(&plane, &line),
            Err(RegistrationError::CollinearCorrespondences)
        ));

        let coincident = PointCloud::new(vec![[2.0, 2.0, 2.0]; 5]);
        let spread = PointCloud::new(vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
        ]);
        assert!(matches!(
            estimate_rigid_alignment(&spread, &coincident),
            Err(RegistrationError::CollinearCorrespondences)
        ));
    }

    #[test]
    fn test_non_finite_input() {
        let source = PointCloud::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, f64::NAN, 0.0]]);
        let target = PointCloud::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        assert!(matches!(
            estimate_rigid_alignment(&source, &target),
            Err(RegistrationError::NonFiniteInput)
        ));
    }
}
