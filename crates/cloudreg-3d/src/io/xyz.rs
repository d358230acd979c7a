use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::pointcloud::PointCloud;

/// Error types for the XYZ module.
#[derive(Debug, thiserror::Error)]
pub enum XyzError {
    /// Failed to read or write the file.
    #[error("Failed to access the XYZ file")]
    Io(#[from] std::io::Error),

    /// A line does not hold three numeric coordinates.
    #[error("Invalid point at line {line}: {content:?}")]
    Parse {
        /// One-based line number.
        line: usize,
        /// The offending line.
        content: String,
    },
}

/// Parse a single `x y z` line. Extra columns are ignored.
fn parse_point(line: &str) -> Option<[f64; 3]> {
    let mut values = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>());

    let mut point = [0.0; 3];
    for coord in point.iter_mut() {
        *coord = values.next()?.ok()?;
    }
    Some(point)
}

/// Read XYZ points from a reader.
///
/// Blank lines and lines starting with `#` are skipped.
pub fn read_xyz_from<R: BufRead>(reader: R) -> Result<PointCloud, XyzError> {
    let mut points = Vec::new();

    for (line_idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let point = parse_point(trimmed).ok_or_else(|| XyzError::Parse {
            line: line_idx + 1,
            content: trimmed.to_string(),
        })?;
        points.push(point);
    }

    Ok(PointCloud::new(points))
}

/// Read a point cloud from a text file with one `x y z` point per line.
///
/// # Arguments
///
/// * `path` - The path to the XYZ file.
///
/// # Returns
///
/// A `PointCloud` with the points in file order.
pub fn read_xyz(path: impl AsRef<Path>) -> Result<PointCloud, XyzError> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let pointcloud = read_xyz_from(BufReader::new(file))?;
    log::debug!("read {} points from {}", pointcloud.len(), path.display());
    Ok(pointcloud)
}

/// Write a point cloud as text, one `x y z` point per line.
pub fn write_xyz(path: impl AsRef<Path>, pointcloud: &PointCloud) -> Result<(), XyzError> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    for [x, y, z] in pointcloud.points() {
        writeln!(writer, "{x} {y} {z}")?;
    }
    writer.flush()?;
    log::debug!("wrote {} points to {}", pointcloud.len(), path.display());
    Ok(())
}
