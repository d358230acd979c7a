use cloudreg_3d::{
    ops::squared_distance,
    pointcloud::{PointCloud, PointCloudError},
};
use serde::{Deserialize, Serialize};

use crate::{error::RegistrationError, kd_tree::KdTree};

/// Strategy used to match each source point to a target point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrespondenceMethod {
    /// Exhaustive scan over all target points.
    BruteForce,
    /// Greedy descent of a [`KdTree`] built over the target. Approximate.
    KdTree,
    /// Backtracking search of a [`KdTree`] built over the target. Exact.
    #[default]
    KdTreeExact,
}

/// A source point paired with its match in the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    /// Index into the source cloud.
    pub source_index: usize,
    /// Index into the target cloud.
    pub target_index: usize,
    /// Squared distance between the two points.
    pub squared_distance: f64,
}

/// Matches query points against a fixed target cloud.
///
/// The spatial index, if the method needs one, is built once and reused by
/// every call, so a single search serves all iterations of a registration.
pub struct CorrespondenceSearch<'a> {
    target: &'a PointCloud,
    method: CorrespondenceMethod,
    tree: Option<KdTree<'a>>,
}

impl<'a> CorrespondenceSearch<'a> {
    /// Prepare a search over `target`.
    pub fn new(
        target: &'a PointCloud,
        method: CorrespondenceMethod,
    ) -> Result<Self, RegistrationError> {
        if target.is_empty() {
            return Err(RegistrationError::EmptyPointCloud { role: "target" });
        }

        let tree = match method {
            CorrespondenceMethod::BruteForce => {
                if target.points().iter().flatten().any(|v| !v.is_finite()) {
                    return Err(RegistrationError::NonFiniteInput);
                }
                None
            }
            CorrespondenceMethod::KdTree | CorrespondenceMethod::KdTreeExact => {
                Some(KdTree::build(target)?)
            }
        };

        Ok(Self {
            target,
            method,
            tree,
        })
    }

    /// The method used by this search.
    pub fn method(&self) -> CorrespondenceMethod {
        self.method
    }

    /// The target cloud.
    pub fn target(&self) -> &'a PointCloud {
        self.target
    }

    /// Index of the target point matched to `query`.
    pub fn nearest(&self, query: &[f64; 3]) -> Option<usize> {
        match (&self.tree, self.method) {
            (Some(tree), CorrespondenceMethod::KdTreeExact) => tree.nearest_exact(query),
            (Some(tree), _) => tree.nearest(query),
            (None, _) => self.target.closest_point(query),
        }
    }

    /// Match every point of `source`.
    ///
    /// The result is parallel to `source`: entry `i` has `source_index == i`.
    pub fn find(&self, source: &[[f64; 3]]) -> Result<Vec<Correspondence>, RegistrationError> {
        if source.is_empty() {
            return Err(RegistrationError::EmptyPointCloud { role: "source" });
        }

        let mut correspondences = Vec::new();
        correspondences.try_reserve_exact(source.len())?;

        let target = self.target.points();
        for (source_index, query) in source.iter().enumerate() {
            if query.iter().any(|v| !v.is_finite()) {
                return Err(RegistrationError::NonFiniteInput);
            }
            let target_index = self
                .nearest(query)
                .ok_or(RegistrationError::EmptyPointCloud { role: "target" })?;
            correspondences.push(Correspondence {
                source_index,
                target_index,
                squared_distance: squared_distance(query, &target[target_index]),
            });
        }

        Ok(correspondences)
    }

    /// The matched target points, parallel to `source`.
    pub fn closest_points(&self, source: &[[f64; 3]]) -> Result<PointCloud, RegistrationError> {
        let correspondences = self.find(source)?;
        matched_points(self.target, &correspondences)
    }
}

/// Collect the target points of a set of correspondences, in order.
pub fn matched_points(
    target: &PointCloud,
    correspondences: &[Correspondence],
) -> Result<PointCloud, RegistrationError> {
    let mut matched = PointCloud::try_with_capacity(correspondences.len())?;
    for c in correspondences {
        let point = target
            .get(c.target_index)
            .ok_or(PointCloudError::IndexOutOfBounds {
                index: c.target_index,
                len: target.len(),
            })?;
        matched.push(*point);
    }
    Ok(matched)
}

/// Pair every point of `source` with a point of `target`.
///
/// # Arguments
///
/// * `source` - The points to match.
/// * `target` - The points to match against.
/// * `method` - The search strategy.
///
/// # Returns
///
/// One correspondence per source point, in source order.
pub fn find_correspondences(
    source: &PointCloud,
    target: &PointCloud,
    method: CorrespondenceMethod,
) -> Result<Vec<Correspondence>, RegistrationError> {
    if source.is_empty() {
        return Err(RegistrationError::EmptyPointCloud { role: "source" });
    }
    CorrespondenceSearch::new(target, method)?.find(source.points())
}

/// The point of `target` judged closest to each point of `source`.
///
/// The returned cloud has the same length as `source`.
pub fn closest_points(
    source: &PointCloud,
    target: &PointCloud,
    method: CorrespondenceMethod,
) -> Result<PointCloud, RegistrationError> {
    let correspondences = find_correspondences(source, target, method)?;
    matched_points(target, &correspondences)
}
