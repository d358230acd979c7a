/// Error types for the linear algebra module.
#[derive(Debug, thiserror::Error)]
pub enum LinalgError {
    /// Source and destination buffers must have the same number of points.
    #[error("Source and destination lengths differ: {0} != {1}")]
    MismatchedLength(usize, usize),
}

/// Dot product of two 3-vectors.
#[inline]
pub fn dot_product3(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Multiply two 3x3 row-major matrices as `m = a * b`.
pub fn matmul33(a: &[[f64; 3]; 3], b: &[[f64; 3]; 3], m: &mut [[f64; 3]; 3]) {
    for (i, row) in m.iter_mut().enumerate() {
        for (j, val) in row.iter_mut().enumerate() {
            *val = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
}

/// Multiply two 4x4 row-major matrices and return `a * b`.
pub fn matmul44(a: &[[f64; 4]; 4], b: &[[f64; 4]; 4]) -> [[f64; 4]; 4] {
    let mut m = [[0.0; 4]; 4];
    for (i, row) in m.iter_mut().enumerate() {
        for (j, val) in row.iter_mut().enumerate() {
            *val = (0..4).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    m
}

/// Transform a set of points using a rotation and translation.
///
/// # Arguments
///
/// * `src_points` - A set of points to be transformed.
/// * `dst_r_src` - A row-major rotation matrix.
/// * `dst_t_src` - A translation vector.
/// * `dst_points` - A pre-allocated buffer to store the transformed points.
///
/// PRECONDITION: dst_points is a pre-allocated buffer of the same size as source.
///
/// Example:
///
/// ```
/// use cloudreg_3d::linalg::transform_points3d;
///
/// let src_points = vec![[2.0, 2.0, 2.0], [3.0, 4.0, 5.0]];
/// let rotation = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
/// let translation = [0.0, 0.0, 0.0];
/// let mut dst_points = vec![[0.0; 3]; src_points.len()];
/// transform_points3d(&src_points, &rotation, &translation, &mut dst_points).unwrap();
/// assert_eq!(dst_points, src_points);
/// ```
pub fn transform_points3d(
    src_points: &[[f64; 3]],
    dst_r_src: &[[f64; 3]; 3],
    dst_t_src: &[f64; 3],
    dst_points: &mut [[f64; 3]],
) -> Result<(), LinalgError> {
    if src_points.len() != dst_points.len() {
        return Err(LinalgError::MismatchedLength(
            src_points.len(),
            dst_points.len(),
        ));
    }

    if src_points.is_empty() {
        return Ok(());
    }

    // create a view of the rotation matrix
    let dst_r_src_mat = {
        // SAFETY: [[f64; 3]; 3] is laid out as 9 contiguous f64 values
        let rotation_slice =
            unsafe { std::slice::from_raw_parts(dst_r_src.as_ptr() as *const f64, 9) };
        faer::mat::from_row_major_slice(rotation_slice, 3, 3)
    };

    // create view of the source points
    let points_in_src = {
        // SAFETY: [[f64; 3]] is laid out as 3 * len contiguous f64 values
        let src_points_slice = unsafe {
            std::slice::from_raw_parts(src_points.as_ptr() as *const f64, src_points.len() * 3)
        };
        // Nx3 row-major view, one point per row
        faer::mat::from_row_major_slice(src_points_slice, src_points.len(), 3)
    };

    // create a mutable view of the destination points
    let mut points_in_dst = {
        // SAFETY: same layout argument as above, and dst_points is borrowed mutably
        let dst_points_slice = unsafe {
            std::slice::from_raw_parts_mut(
                dst_points.as_mut_ptr() as *mut f64,
                dst_points.len() * 3,
            )
        };
        // 3xN column-major view, one point per column
        faer::mat::from_column_major_slice_mut(dst_points_slice, 3, dst_points.len())
    };

    faer::linalg::matmul::matmul(
        &mut points_in_dst,
        dst_r_src_mat,
        points_in_src.transpose(),
        None,
        1.0,
        faer::Parallelism::None,
    );

    let [tx, ty, tz] = *dst_t_src;
    for mut col in points_in_dst.col_iter_mut() {
        col.write(0, col.read(0) + tx);
        col.write(1, col.read(1) + ty);
        col.write(2, col.read(2) + tz);
    }

    Ok(())
}
