/// Compute the squared Euclidean distance between two points.
///
/// Example:
/// ```
/// use cloudreg_3d::ops::squared_distance;
///
/// let a = [1.0, 2.0, 3.0];
/// let b = [4.0, 6.0, 3.0];
/// assert_eq!(squared_distance(&a, &b), 25.0);
/// ```
#[inline]
pub fn squared_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

/// Utility function to compute the Euclidean distance between two points.
///
/// # Arguments
///
/// * `a` - A point in 3D space.
/// * `b` - Another point in 3D space.
///
/// # Returns
///
/// The Euclidean distance between the two points.
///
/// Example:
/// ```
/// use cloudreg_3d::ops::euclidean_distance;
///
/// let a = [1.0, 2.0, 3.0];
/// let b = [4.0, 5.0, 6.0];
/// let dst = euclidean_distance(&a, &b);
/// ```
pub fn euclidean_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    squared_distance(a, b).sqrt()
}

/// Compute the arithmetic mean of a set of points.
///
/// Returns `None` when `points` is empty.
pub fn compute_centroid(points: &[[f64; 3]]) -> Option<[f64; 3]> {
    if points.is_empty() {
        return None;
    }

    let sum = points.iter().fold([0.0; 3], |mut acc, p| {
        acc[0] += p[0];
        acc[1] += p[1];
        acc[2] += p[2];
        acc
    });

    let n = points.len() as f64;
    Some([sum[0] / n, sum[1] / n, sum[2] / n])
}
