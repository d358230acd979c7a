use approx::assert_relative_eq;
use cloudreg_3d::{
    io::xyz::{read_xyz, write_xyz},
    pointcloud::PointCloud,
    transforms::{axis_angle_to_rotation_matrix, RigidTransform},
};
use cloudreg_icp::{
    alignment::estimate_rigid_alignment,
    correspondence::{closest_points, CorrespondenceMethod},
    icp_align, icp_vanilla,
    kd_tree::KdTree,
    ICPConfig, ICPStatus, InitialGuess, RegistrationError,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn random_cloud(seed: u64, num_points: usize) -> PointCloud {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..num_points)
        .map(|_| {
            [
                rng.random_range(-2.0..2.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-0.5..0.5),
            ]
        })
        .collect()
}

fn assert_clouds_eq(a: &PointCloud, b: &PointCloud, epsilon: f64) {
    assert_eq!(a.len(), b.len());
    for (pa, pb) in a.points().iter().zip(b.points()) {
        for k in 0..3 {
            assert_relative_eq!(pa[k], pb[k], epsilon = epsilon);
        }
    }
}

#[test]
fn register_clouds_from_files() -> Result<(), Box<dyn std::error::Error>> {
    let source = random_cloud(17, 500);
    let rotation = axis_angle_to_rotation_matrix(&[0.2, 0.1, 1.0], 0.15)?;
    let transform = RigidTransform::from_rotation_translation(&rotation, &[0.3, -0.1, 0.2]);
    let target = source.transformed(&transform)?;

    let dir = tempfile::tempdir()?;
    let source_path = dir.path().join("source.xyz");
    let target_path = dir.path().join("target.xyz");
    write_xyz(&source_path, &source)?;
    write_xyz(&target_path, &target)?;

    let source = read_xyz(&source_path)?;
    let target = read_xyz(&target_path)?;

    let result = icp_vanilla(&source, &target, &ICPConfig::default())?;
    assert_eq!(result.status, ICPStatus::Converged);
    assert!(result.rmse < 1e-6);
    assert_clouds_eq(&result.aligned, &target, 1e-5);
    assert_clouds_eq(&source.transformed(&result.transform)?, &result.aligned, 1e-9);
    Ok(())
}

#[test]
fn function_level_pipeline() -> Result<(), Box<dyn std::error::Error>> {
    let source = random_cloud(5, 64);
    let rotation = axis_angle_to_rotation_matrix(&[1.0, 0.0, 0.0], 0.05)?;
    let transform = RigidTransform::from_rotation_translation(&rotation, &[0.01, 0.02, 0.0]);
    let target = source.transformed(&transform)?;

    // every target point is its own nearest neighbor
    let tree = KdTree::build(&target)?;
    for (i, p) in target.points().iter().enumerate() {
        assert_eq!(tree.nearest_exact(p), Some(i));
    }

    let matched = closest_points(&source, &target, CorrespondenceMethod::BruteForce)?;
    assert_eq!(matched.len(), source.len());

    // aligning against the true pairs recovers the transform in one step
    let estimated = estimate_rigid_alignment(&source, &target)?;
    assert_clouds_eq(&source.transformed(&estimated)?, &target, 1e-9);

    let result = icp_align(&source, &target, 1e-10, 30)?;
    assert_eq!(result.status, ICPStatus::Converged);
    assert_clouds_eq(&result.aligned, &target, 1e-6);
    Ok(())
}

#[test]
fn greedy_index_from_identity_on_cube() -> Result<(), Box<dyn std::error::Error>> {
    let cube = [0.0, 1.0]
        .iter()
        .flat_map(|&x| [0.0, 1.0].map(|y| (x, y)))
        .flat_map(|(x, y)| [0.0, 1.0].map(|z| [x, y, z]))
        .collect::<PointCloud>();
    let rotation = axis_angle_to_rotation_matrix(&[0.0, 0.0, 1.0], 30f64.to_radians())?;
    let transform = RigidTransform::from_rotation_translation(&rotation, &[1.0, 2.0, 3.0]);
    let target = cube.transformed(&transform)?;

    // from the raw pose every source point matches the same corner
    for method in [
        CorrespondenceMethod::BruteForce,
        CorrespondenceMethod::KdTree,
        CorrespondenceMethod::KdTreeExact,
    ] {
        let config = ICPConfig {
            correspondence: method,
            initial_guess: InitialGuess::Identity,
            ..Default::default()
        };
        assert!(matches!(
            icp_vanilla(&cube, &target, &config),
            Err(RegistrationError::CollinearCorrespondences)
        ));
    }

    // starting from the centroids the greedy index is enough
    let config = ICPConfig {
        correspondence: CorrespondenceMethod::KdTree,
        ..Default::default()
    };
    let result = icp_vanilla(&cube, &target, &config)?;
    assert_eq!(result.status, ICPStatus::Converged);
    assert_clouds_eq(&result.aligned, &target, 1e-4);
    Ok(())
}
