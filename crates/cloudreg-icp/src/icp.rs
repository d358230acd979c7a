use cloudreg_3d::{pointcloud::PointCloud, transforms::RigidTransform};
use serde::{Deserialize, Serialize};

use crate::{
    alignment::estimate_rigid_alignment_with,
    correspondence::{CorrespondenceMethod, CorrespondenceSearch},
    eigen::{FaerEigenSolver, SymmetricEigenSolver},
    error::RegistrationError,
};

/// Structure to define the ICP stopping criteria.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ICPConvergenceCriteria {
    /// Maximum number of iterations to perform.
    pub max_iterations: usize,
    /// Convergence tolerance as the difference in RMSE between two consecutive iterations.
    pub tolerance: f64,
}

impl Default for ICPConvergenceCriteria {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tolerance: 1e-8,
        }
    }
}

/// Where the source cloud starts before the first matching step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum InitialGuess {
    /// Start from the unmodified source.
    Identity,
    /// Translate the source centroid onto the target centroid.
    #[default]
    Centroids,
    /// Start from a caller supplied transform.
    Transform(RigidTransform),
}

/// Parameters of an ICP run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ICPConfig {
    /// Stopping criteria.
    pub criteria: ICPConvergenceCriteria,
    /// How source points are matched to the target.
    pub correspondence: CorrespondenceMethod,
    /// Starting pose of the source.
    pub initial_guess: InitialGuess,
}

/// How an ICP run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ICPStatus {
    /// The RMSE change dropped below the tolerance.
    Converged,
    /// The iteration budget ran out first. The result is still valid.
    Exhausted,
}

/// Result of the ICP algorithm.
///
/// The transformation is from the source to the target frame.
#[derive(Debug, Clone)]
pub struct ICPResult {
    /// Accumulated transform, initial guess included.
    pub transform: RigidTransform,
    /// The source cloud moved by `transform`.
    pub aligned: PointCloud,
    /// Why the run stopped.
    pub status: ICPStatus,
    /// The number of alignment steps performed.
    pub num_iterations: usize,
    /// Last computed RMSE.
    pub rmse: f64,
    /// RMSE of the initial correspondences, then one entry per iteration.
    pub rmse_history: Vec<f64>,
}

// Values carried between the steps of a run.
struct Progress {
    working: PointCloud,
    transform: RigidTransform,
    iteration: usize,
    rmse_history: Vec<f64>,
}

enum IcpState {
    Init,
    Matching(Progress),
    Aligning {
        progress: Progress,
        matched: PointCloud,
    },
    Done(ICPResult),
}

struct IcpContext<'a, S: ?Sized> {
    source: &'a PointCloud,
    target: &'a PointCloud,
    search: CorrespondenceSearch<'a>,
    config: &'a ICPConfig,
    solver: &'a S,
}

impl<S: SymmetricEigenSolver + ?Sized> IcpContext<'_, S> {
    fn step(&self, state: IcpState) -> Result<IcpState, RegistrationError> {
        match state {
            IcpState::Init => self.init(),
            IcpState::Matching(progress) => self.matching(progress),
            IcpState::Aligning { progress, matched } => self.aligning(progress, matched),
            IcpState::Done(result) => Ok(IcpState::Done(result)),
        }
    }

    fn init(&self) -> Result<IcpState, RegistrationError> {
        let transform = match self.config.initial_guess {
            InitialGuess::Identity => RigidTransform::identity(),
            InitialGuess::Centroids => {
                let cs = self
                    .source
                    .centroid()
                    .ok_or(RegistrationError::EmptyPointCloud { role: "source" })?;
                let ct = self
                    .target
                    .centroid()
                    .ok_or(RegistrationError::EmptyPointCloud { role: "target" })?;
                RigidTransform::from_translation(&[ct[0] - cs[0], ct[1] - cs[1], ct[2] - cs[2]])
            }
            InitialGuess::Transform(transform) => transform,
        };

        let mut rmse_history = Vec::new();
        rmse_history.try_reserve(self.config.criteria.max_iterations.min(64) + 1)?;

        Ok(IcpState::Matching(Progress {
            working: self.source.transformed(&transform)?,
            transform,
            iteration: 0,
            rmse_history,
        }))
    }

    fn matching(&self, mut progress: Progress) -> Result<IcpState, RegistrationError> {
        let now = std::time::Instant::now();

        let matched = self.search.closest_points(progress.working.points())?;
        let rmse = progress.working.rmse(&matched)?;
        let previous = progress.rmse_history.last().copied();
        progress.rmse_history.try_reserve(1)?;
        progress.rmse_history.push(rmse);

        let delta = previous.map(|prev| (prev - rmse).abs());
        log::debug!(
            "iteration: {} rmse: {} delta: {:?} elapsed: {:?}",
            progress.iteration,
            rmse,
            delta,
            now.elapsed()
        );

        let status = match delta {
            Some(delta) if delta < self.config.criteria.tolerance => Some(ICPStatus::Converged),
            _ if progress.iteration >= self.config.criteria.max_iterations => {
                Some(ICPStatus::Exhausted)
            }
            _ => None,
        };

        let Some(status) = status else {
            return Ok(IcpState::Aligning { progress, matched });
        };

        match status {
            ICPStatus::Converged => log::info!(
                "ICP converged in {} iterations with rmse {}",
                progress.iteration,
                rmse
            ),
            ICPStatus::Exhausted => log::warn!(
                "ICP stopped after {} iterations without converging, rmse {}",
                progress.iteration,
                rmse
            ),
        }

        Ok(IcpState::Done(ICPResult {
            transform: progress.transform,
            aligned: progress.working,
            status,
            num_iterations: progress.iteration,
            rmse,
            rmse_history: progress.rmse_history,
        }))
    }

    fn aligning(
        &self,
        progress: Progress,
        matched: PointCloud,
    ) -> Result<IcpState, RegistrationError> {
        let increment = estimate_rigid_alignment_with(&progress.working, &matched, self.solver)?;

        Ok(IcpState::Matching(Progress {
            working: progress.working.transformed(&increment)?,
            transform: increment.compose(&progress.transform),
            iteration: progress.iteration + 1,
            rmse_history: progress.rmse_history,
        }))
    }
}

/// Iterative Closest Point (ICP) algorithm using point to point distance.
///
/// Repeats matching the source against the target and re-estimating the
/// rigid transform until the RMSE stops changing or the iteration budget is
/// spent.
///
/// # Arguments
///
/// * `source` - Source point cloud.
/// * `target` - Target point cloud.
/// * `config` - Stopping criteria, matching method and starting pose.
///
/// # Returns
///
/// The accumulated transform and the aligned source. Running out of
/// iterations is reported through [`ICPResult::status`], not as an error.
pub fn icp_vanilla(
    source: &PointCloud,
    target: &PointCloud,
    config: &ICPConfig,
) -> Result<ICPResult, RegistrationError> {
    icp_vanilla_with(source, target, config, &FaerEigenSolver)
}

/// Same as [`icp_vanilla`] with a caller supplied eigen solver.
pub fn icp_vanilla_with<S: SymmetricEigenSolver + ?Sized>(
    source: &PointCloud,
    target: &PointCloud,
    config: &ICPConfig,
    solver: &S,
) -> Result<ICPResult, RegistrationError> {
    if source.is_empty() {
        return Err(RegistrationError::EmptyPointCloud { role: "source" });
    }

    let context = IcpContext {
        source,
        target,
        search: CorrespondenceSearch::new(target, config.correspondence)?,
        config,
        solver,
    };

    let mut state = IcpState::Init;
    loop {
        state = match context.step(state)? {
            IcpState::Done(result) => return Ok(result),
            next => next,
        };
    }
}

/// Align `source` onto `target` with the default configuration.
///
/// # Arguments
///
/// * `source` - Source point cloud.
/// * `target` - Target point cloud.
/// * `epsilon` - Convergence threshold on the RMSE change.
/// * `max_iterations` - Iteration budget.
pub fn icp_align(
    source: &PointCloud,
    target: &PointCloud,
    epsilon: f64,
    max_iterations: usize,
) -> Result<ICPResult, RegistrationError> {
    let config = ICPConfig {
        criteria: ICPConvergenceCriteria {
            max_iterations,
            tolerance: epsilon,
        },
        ..Default::default()
    };
    icp_vanilla(source, target, &config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eigen::JacobiEigenSolver;
    use approx::assert_relative_eq;
    use cloudreg_3d::transforms::axis_angle_to_rotation_matrix;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn unit_cube() -> PointCloud {
        let mut points = Vec::new();
        for x in [0.0, 1.0] {
            for y in [0.0, 1.0] {
                for z in [0.0, 1.0] {
                    points.push([x, y, z]);
                }
            }
        }
        PointCloud::new(points)
    }

    fn cube_target() -> Result<(PointCloud, RigidTransform), Box<dyn std::error::Error>> {
        let rotation = axis_angle_to_rotation_matrix(&[0.0, 0.0, 1.0], 30f64.to_radians())?;
        let transform = RigidTransform::from_rotation_translation(&rotation, &[1.0, 2.0, 3.0]);
        Ok((unit_cube().transformed(&transform)?, transform))
    }

    fn assert_points_eq(a: &PointCloud, b: &PointCloud, epsilon: f64) {
        assert_eq!(a.len(), b.len());
        for (pa, pb) in a.points().iter().zip(b.points().iter()) {
            for (va, vb) in pa.iter().zip(pb.iter()) {
                assert_relative_eq!(va, vb, epsilon = epsilon);
            }
        }
    }

    #[test]
    fn test_icp_cube() -> Result<(), Box<dyn std::error::Error>> {
        let source = unit_cube();
        let (target, expected) = cube_target()?;

        let result = icp_align(&source, &target, 1e-8, 50)?;

        assert_eq!(result.status, ICPStatus::Converged);
        assert_points_eq(&result.aligned, &target, 1e-4);
        assert_points_eq(&source.transformed(&result.transform)?, &target, 1e-4);
        for (ra, rb) in result.transform.matrix().iter().zip(expected.matrix()) {
            for (va, vb) in ra.iter().zip(rb.iter()) {
                assert_relative_eq!(va, vb, epsilon = 1e-6);
            }
        }
        assert!(result.rmse < 1e-6);
        assert_eq!(result.rmse_history.len(), result.num_iterations + 1);
        Ok(())
    }

    #[test]
    fn test_icp_identical_clouds() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = StdRng::seed_from_u64(0);
        let cloud = (0..100)
            .map(|_| [rng.random::<f64>(), rng.random::<f64>(), rng.random::<f64>()])
            .collect::<PointCloud>();

        let result = icp_align(&cloud, &cloud, 1e-8, 50)?;

        assert_eq!(result.status, ICPStatus::Converged);
        assert_eq!(result.num_iterations, 1);
        assert_relative_eq!(result.rmse, 0.0, epsilon = 1e-12);
        let identity = RigidTransform::identity();
        for (ra, rb) in result.transform.matrix().iter().zip(identity.matrix()) {
            for (va, vb) in ra.iter().zip(rb.iter()) {
                assert_relative_eq!(va, vb, epsilon = 1e-9);
            }
        }
        Ok(())
    }

    #[test]
    fn test_icp_unbounded_budget() -> Result<(), Box<dyn std::error::Error>> {
        let source = unit_cube();
        let (target, _) = cube_target()?;

        let result = icp_align(&source, &target, 1e-8, usize::MAX)?;
        assert_eq!(result.status, ICPStatus::Converged);
        assert_eq!(result.rmse_history.len(), result.num_iterations + 1);
        Ok(())
    }

    #[test]
    fn test_icp_exhausted() -> Result<(), Box<dyn std::error::Error>> {
        let source = unit_cube();
        let (target, _) = cube_target()?;

        let result = icp_align(&source, &target, 1e-8, 1)?;
        assert_eq!(result.status, ICPStatus::Exhausted);
        assert_eq!(result.num_iterations, 1);
        assert_eq!(result.rmse_history.len(), 2);

        // a zero budget returns the initial guess
        let result = icp_align(&source, &target, 1e-8, 0)?;
        assert_eq!(result.status, ICPStatus::Exhausted);
        assert_eq!(result.num_iterations, 0);
        let cs = source.centroid().ok_or("empty")?;
        let ct = target.centroid().ok_or("empty")?;
        let t = result.transform.translation();
        for k in 0..3 {
            assert_relative_eq!(t[k], ct[k] - cs[k], epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_icp_monotonic_rmse() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = StdRng::seed_from_u64(21);
        let source = (0..200)
            .map(|_| {
                [
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                ]
            })
            .collect::<PointCloud>();

        let rotation = axis_angle_to_rotation_matrix(&[1.0, 0.5, 0.0], 0.2)?;
        let transform = RigidTransform::from_rotation_translation(&rotation, &[0.1, -0.2, 0.05]);
        let target = source
            .transformed(&transform)?
            .points()
            .iter()
            .map(|p| {
                [
                    p[0] + rng.random_range(-0.01..0.01),
                    p[1] + rng.random_range(-0.01..0.01),
                    p[2] + rng.random_range(-0.01..0.01),
                ]
            })
            .collect::<PointCloud>();

        let config = ICPConfig {
            criteria: ICPConvergenceCriteria {
                max_iterations: 100,
                tolerance: 1e-10,
            },
            correspondence: CorrespondenceMethod::BruteForce,
            initial_guess: InitialGuess::Identity,
        };
        let result = icp_vanilla(&source, &target, &config)?;

        // exact matching followed by an optimal alignment never increases the error
        for pair in result.rmse_history.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-12, "rmse increased: {pair:?}");
        }
        assert!(result.rmse < 0.02);
        Ok(())
    }

    #[test]
    fn test_icp_with_jacobi_and_initial_transform() -> Result<(), Box<dyn std::error::Error>> {
        let source = unit_cube();
        let (target, expected) = cube_target()?;

        let config = ICPConfig {
            initial_guess: InitialGuess::Transform(expected),
            ..Default::default()
        };
        let result = icp_vanilla_with(&source, &target, &config, &JacobiEigenSolver::default())?;

        assert_eq!(result.status, ICPStatus::Converged);
        assert_points_eq(&result.aligned, &target, 1e-9);
        Ok(())
    }

    #[test]
    fn test_icp_empty_inputs() {
        let empty = PointCloud::default();
        let cube = unit_cube();
        assert!(matches!(
            icp_align(&empty, &cube, 1e-8, 10),
            Err(RegistrationError::EmptyPointCloud { role: "source" })
        ));
        assert!(matches!(
            icp_align(&cube, &empty, 1e-8, 10),
            Err(RegistrationError::EmptyPointCloud { role: "target" })
        ));
    }

    #[test]
    fn test_icp_degenerate_fails() {
        let line = PointCloud::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0]]);
        let target = unit_cube();
        assert!(matches!(
            icp_align(&line, &target, 1e-8, 10),
            Err(RegistrationError::CollinearCorrespondences)
        ));

        let pair = PointCloud::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
        assert!(matches!(
            icp_align(&pair, &target, 1e-8, 10),
            Err(RegistrationError::InsufficientCorrespondences { .. })
        ));
    }

    #[test]
    fn test_config_serde() -> Result<(), serde_json::Error> {
        let config = ICPConfig {
            criteria: ICPConvergenceCriteria {
                max_iterations: 20,
                tolerance: 1e-6,
            },
            correspondence: CorrespondenceMethod::KdTree,
            initial_guess: InitialGuess::Transform(RigidTransform::from_translation(&[
                1.0, 2.0, 3.0,
            ])),
        };
        let json = serde_json::to_string(&config)?;
        let parsed: ICPConfig = serde_json::from_str(&json)?;
        assert_eq!(parsed, config);

        // missing fields fall back to defaults
        let parsed: ICPConfig = serde_json::from_str(r#"{"correspondence": "BruteForce"}"#)?;
        assert_eq!(parsed.correspondence, CorrespondenceMethod::BruteForce);
        assert_eq!(parsed.criteria, ICPConvergenceCriteria::default());
        assert_eq!(parsed.initial_guess, InitialGuess::Centroids);
        Ok(())
    }
}
