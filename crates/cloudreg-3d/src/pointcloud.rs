use std::collections::TryReserveError;
use std::sync::OnceLock;

use glam::DVec3;

use crate::linalg::LinalgError;
use crate::ops;
use crate::transforms::RigidTransform;

/// Error types for point cloud operations.
#[derive(Debug, thiserror::Error)]
pub enum PointCloudError {
    /// The operation needs at least one point.
    #[error("Pointcloud data is empty")]
    EmptyData,

    /// Two index-paired point clouds have different sizes.
    #[error("Pointcloud sizes differ: {left} != {right}")]
    MismatchedSize {
        /// Size of the left-hand cloud.
        left: usize,
        /// Size of the right-hand cloud.
        right: usize,
    },

    /// Point index is past the end of the cloud.
    #[error("Point index {index} out of bounds for cloud of {len} points")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Number of points in the cloud.
        len: usize,
    },

    /// Growing the point buffer failed.
    #[error("Failed to allocate point buffer")]
    AllocationFailed(#[from] TryReserveError),

    /// Batched point transform failed.
    #[error(transparent)]
    Linalg(#[from] LinalgError),
}

/// An ordered set of 3D points with a lazily computed centroid.
///
/// The centroid is memoized on first access. Methods that move points drop the
/// cached value, and the rigid operations (`scale`, `translate`, `transform`,
/// `rotate_*`) recompute it right away.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    // The points in the point cloud.
    points: Vec<[f64; 3]>,
    // Cached arithmetic mean of `points`.
    centroid: OnceLock<[f64; 3]>,
}

impl PointCloud {
    /// Create a new point cloud from points.
    pub fn new(points: Vec<[f64; 3]>) -> Self {
        Self {
            points,
            centroid: OnceLock::new(),
        }
    }

    /// Create an empty point cloud with room for `capacity` points.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(Vec::with_capacity(capacity))
    }

    /// Create an empty point cloud, reporting allocation failure instead of aborting.
    pub fn try_with_capacity(capacity: usize) -> Result<Self, PointCloudError> {
        let mut points = Vec::new();
        points.try_reserve_exact(capacity)?;
        Ok(Self::new(points))
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get as reference the points in the point cloud.
    #[inline]
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// Consume the cloud and return its points.
    pub fn into_points(self) -> Vec<[f64; 3]> {
        self.points
    }

    /// Get the point at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&[f64; 3]> {
        self.points.get(index)
    }

    /// Overwrite the point at `index`.
    pub fn set_point(&mut self, index: usize, point: [f64; 3]) -> Result<(), PointCloudError> {
        let len = self.points.len();
        let slot = self
            .points
            .get_mut(index)
            .ok_or(PointCloudError::IndexOutOfBounds { index, len })?;
        *slot = point;
        self.centroid.take();
        Ok(())
    }

    /// Append a point.
    pub fn push(&mut self, point: [f64; 3]) {
        self.points.push(point);
        self.centroid.take();
    }

    /// Append a point, reporting allocation failure instead of aborting.
    pub fn try_push(&mut self, point: [f64; 3]) -> Result<(), PointCloudError> {
        self.points.try_reserve(1)?;
        self.push(point);
        Ok(())
    }

    /// The arithmetic mean of all points, or `None` if the cloud is empty.
    pub fn centroid(&self) -> Option<[f64; 3]> {
        if let Some(centroid) = self.centroid.get() {
            return Some(*centroid);
        }
        let centroid = ops::compute_centroid(&self.points)?;
        Some(*self.centroid.get_or_init(|| centroid))
    }

    fn refresh_centroid(&mut self) {
        self.centroid.take();
        let _ = self.centroid();
    }

    /// Scale every coordinate by `factor` about the origin.
    pub fn scale(&mut self, factor: f64) {
        for p in self.points.iter_mut() {
            p[0] *= factor;
            p[1] *= factor;
            p[2] *= factor;
        }
        self.refresh_centroid();
    }

    /// Move every point by `offset`.
    pub fn translate(&mut self, offset: &[f64; 3]) {
        for p in self.points.iter_mut() {
            p[0] += offset[0];
            p[1] += offset[1];
            p[2] += offset[2];
        }
        self.refresh_centroid();
    }

    /// Move the cloud so that its centroid lands on `destination`.
    pub fn translate_to(&mut self, destination: &[f64; 3]) {
        if let Some(c) = self.centroid() {
            let offset = [
                destination[0] - c[0],
                destination[1] - c[1],
                destination[2] - c[2],
            ];
            self.translate(&offset);
        }
    }

    fn rotate(&mut self, rotation: &[[f64; 3]; 3]) {
        let transform = RigidTransform::from_rotation_translation(rotation, &[0.0; 3]);
        for p in self.points.iter_mut() {
            *p = transform.apply(p);
        }
        self.refresh_centroid();
    }

    /// Rotate about the x axis through the origin.
    pub fn rotate_x(&mut self, radians: f64) {
        let (s, c) = radians.sin_cos();
        self.rotate(&[[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]]);
    }

    /// Rotate about the y axis through the origin.
    pub fn rotate_y(&mut self, radians: f64) {
        let (s, c) = radians.sin_cos();
        self.rotate(&[[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]]);
    }

    /// Rotate about the z axis through the origin.
    pub fn rotate_z(&mut self, radians: f64) {
        let (s, c) = radians.sin_cos();
        self.rotate(&[[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]]);
    }

    /// Return a transformed copy of the cloud.
    pub fn transformed(&self, transform: &RigidTransform) -> Result<PointCloud, PointCloudError> {
        let mut points = Vec::new();
        points.try_reserve_exact(self.points.len())?;
        points.resize(self.points.len(), [0.0; 3]);
        transform.apply_points(&self.points, &mut points)?;
        Ok(PointCloud::new(points))
    }

    /// Apply a rigid transform in place.
    pub fn transform(&mut self, transform: &RigidTransform) -> Result<(), PointCloudError> {
        *self = self.transformed(transform)?;
        self.refresh_centroid();
        Ok(())
    }

    /// Get the minimum bound of the point cloud.
    pub fn min_bound(&self) -> Option<[f64; 3]> {
        self.points
            .iter()
            .map(|p| DVec3::from_array(*p))
            .reduce(|a, b| a.min(b))
            .map(|v| v.to_array())
    }

    /// Get the maximum bound of the point cloud.
    pub fn max_bound(&self) -> Option<[f64; 3]> {
        self.points
            .iter()
            .map(|p| DVec3::from_array(*p))
            .reduce(|a, b| a.max(b))
            .map(|v| v.to_array())
    }

    /// Index of the point closest to `query` by exhaustive search.
    ///
    /// On ties the lowest index wins.
    pub fn closest_point(&self, query: &[f64; 3]) -> Option<usize> {
        let mut best = None;
        let mut best_dist = f64::INFINITY;
        for (i, p) in self.points.iter().enumerate() {
            let dist = ops::squared_distance(query, p);
            if dist < best_dist || best.is_none() {
                best_dist = dist;
                best = Some(i);
            }
        }
        best
    }

    /// Largest distance between a point and the centroid.
    pub fn max_distance_from_centroid(&self) -> Option<f64> {
        let c = self.centroid()?;
        self.points
            .iter()
            .map(|p| ops::squared_distance(p, &c))
            .reduce(f64::max)
            .map(f64::sqrt)
    }

    /// Concatenate two clouds into a new one.
    pub fn concat(&self, other: &PointCloud) -> PointCloud {
        let mut points = Vec::with_capacity(self.len() + other.len());
        points.extend_from_slice(&self.points);
        points.extend_from_slice(&other.points);
        PointCloud::new(points)
    }

    /// Root-mean-square distance between index-paired points of two clouds.
    pub fn rmse(&self, other: &PointCloud) -> Result<f64, PointCloudError> {
        if self.len() != other.len() {
            return Err(PointCloudError::MismatchedSize {
                left: self.len(),
                right: other.len(),
            });
        }
        if self.is_empty() {
            return Err(PointCloudError::EmptyData);
        }

        let sum = self
            .points
            .iter()
            .zip(other.points.iter())
            .map(|(a, b)| ops::squared_distance(a, b))
            .sum::<f64>();

        Ok((sum / self.len() as f64).sqrt())
    }
}

impl FromIterator<[f64; 3]> for PointCloud {
    fn from_iter<I: IntoIterator<Item = [f64; 3]>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
