use log::{debug, warn};

use crate::error::{CloudError, Result};
use crate::point_set::PointSet;
use crate::spatial_index::{GridIndex, NeighborSearch};

/// Indices of points with at least `min_neighbors` other points within `radius`.
///
/// Every point is queried even when `min_neighbors == 0`.
pub fn radius_inliers(points: &PointSet, radius: f64, min_neighbors: usize) -> Result<Vec<usize>> {
    validate(radius)?;
    if points.len() < 2 {
        warn!(
            "ROR skipped: {} point(s) cannot be tested for neighbors, keeping all",
            points.len()
        );
        return Ok((0..points.len()).collect());
    }

    // One radius per cell keeps every query inside a small block of cells.
    let index = GridIndex::with_cell_size(points, radius)?;
    radius_inliers_with(&index, radius, min_neighbors)
}

pub fn radius_inliers_with<S: NeighborSearch>(
    index: &S,
    radius: f64,
    min_neighbors: usize,
) -> Result<Vec<usize>> {
    validate(radius)?;
    let point_count = index.len();
    let mut inliers = Vec::with_capacity(point_count);
    for i in 0..point_count {
        let neighbors = index.count_within_radius(i, radius)?;
        if neighbors >= min_neighbors {
            inliers.push(i);
        }
    }

    debug!(
        "ROR: radius {}, min {}, kept {}/{}",
        radius,
        min_neighbors,
        inliers.len(),
        point_count
    );
    Ok(inliers)
}

/// Radius Outlier Removal. Returns the retained points in their original order.
pub fn remove_radius_outliers(
    points: &PointSet,
    radius: f64,
    min_neighbors: usize,
) -> Result<PointSet> {
    let inliers = radius_inliers(points, radius, min_neighbors)?;
    if inliers.len() == points.len() {
        return Ok(points.clone());
    }
    Ok(points.select(&inliers))
}

fn validate(radius: f64) -> Result<()> {
    if !(radius.is_finite() && radius > 0.0) {
        return Err(CloudError::invalid(
            "ror_radius",
            format!("must be positive and finite, got {radius}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial_index::BruteForceIndex;

    fn cluster_and_strays() -> PointSet {
        PointSet::from_points([
            [0.0, 0.0, 0.0],
            [0.1, 0.0, 0.0],
            [0.0, 0.1, 0.0],
            [5.0, 5.0, 5.0],
            [0.1, 0.1, 0.0],
            [-3.0, 0.0, 1.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_removes_sparse_points() {
        let points = cluster_and_strays();
        let filtered = remove_radius_outliers(&points, 0.5, 2).unwrap();
        assert_eq!(filtered.len(), 4);
        assert_eq!(filtered, points.select(&[0, 1, 2, 4]));
    }

    #[test]
    fn test_zero_minimum_is_identity() {
        let points = cluster_and_strays();
        assert_eq!(remove_radius_outliers(&points, 0.01, 0).unwrap(), points);
    }

    #[test]
    fn test_tiny_clouds_pass_through() {
        let single = PointSet::from_points([[1.0, 2.0, 3.0]]).unwrap();
        assert_eq!(remove_radius_outliers(&single, 1.0, 4).unwrap(), single);
        assert!(remove_radius_outliers(&PointSet::new(), 1.0, 4).unwrap().is_empty());
    }

    #[test]
    fn test_grid_and_brute_force_agree() {
        let points = cluster_and_strays();
        let brute = BruteForceIndex::build(&points).unwrap();
        for radius in [0.1, 0.15, 4.0, 10.0] {
            assert_eq!(
                radius_inliers(&points, radius, 2).unwrap(),
                radius_inliers_with(&brute, radius, 2).unwrap()
            );
        }
    }

    #[test]
    fn test_vanishing_radius_removes_distinct_points() {
        let points = PointSet::from_points(
            (0..100).map(|i| [(i % 10) as f64 * 0.5, (i / 10) as f64 * 0.5, 0.0]),
        )
        .unwrap();
        assert!(remove_radius_outliers(&points, 1e-300, 1).unwrap().is_empty());
        assert_eq!(remove_radius_outliers(&points, 1e-300, 0).unwrap(), points);
    }

    #[test]
    fn test_rejects_non_positive_radius() {
        let points = cluster_and_strays();
        assert!(remove_radius_outliers(&points, 0.0, 1).is_err());
        assert!(remove_radius_outliers(&points, -1.0, 1).is_err());
    }
}
