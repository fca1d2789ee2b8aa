use log::{debug, warn};

use crate::error::{CloudError, Result};
use crate::point_set::PointSet;
use crate::spatial_index::{GridIndex, NeighborSearch};

/// Indices of points whose mean distance to their `k` nearest neighbors is at most
/// `mean + std_ratio * std_dev` over the whole cloud. Indices are ascending.
///
/// Clouds with `len() <= k` are returned whole with a warning.
pub fn statistical_inliers(points: &PointSet, k: usize, std_ratio: f64) -> Result<Vec<usize>> {
    validate(k, std_ratio)?;
    let point_count = points.len();
    if point_count <= k {
        warn!(
            "SOR skipped: {} points is not more than k={}, keeping all",
            point_count, k
        );
        return Ok((0..point_count).collect());
    }

    let index = GridIndex::build(points)?;
    statistical_inliers_with(&index, k, std_ratio)
}

/// Same as [`statistical_inliers`] against an already built index.
pub fn statistical_inliers_with<S: NeighborSearch>(
    index: &S,
    k: usize,
    std_ratio: f64,
) -> Result<Vec<usize>> {
    validate(k, std_ratio)?;
    let point_count = index.len();
    if point_count <= k {
        warn!(
            "SOR skipped: {} points is not more than k={}, keeping all",
            point_count, k
        );
        return Ok((0..point_count).collect());
    }

    let mut mean_distances = Vec::with_capacity(point_count);
    for i in 0..point_count {
        let neighbors = index.k_nearest(i, k)?;
        let sum: f64 = neighbors.iter().map(|n| n.distance).sum();
        mean_distances.push(sum / neighbors.len() as f64);
    }

    let (lowest, highest) = mean_distances
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &d| {
            (lo.min(d), hi.max(d))
        });
    if lowest == highest {
        // Every point has the same statistic, nothing deviates.
        return Ok((0..point_count).collect());
    }

    let mean = mean_distances.iter().sum::<f64>() / point_count as f64;
    // Sample standard deviation (n - 1).
    let variance = mean_distances
        .iter()
        .map(|d| {
            let diff = d - mean;
            diff * diff
        })
        .sum::<f64>()
        / (point_count - 1) as f64;
    let std_dev = variance.sqrt();
    let threshold = mean + std_ratio * std_dev;

    let inliers: Vec<usize> = mean_distances
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d <= threshold)
        .map(|(i, _)| i)
        .collect();

    debug!(
        "SOR: mean {:.6}, std {:.6}, threshold {:.6}, kept {}/{}",
        mean,
        std_dev,
        threshold,
        inliers.len(),
        point_count
    );
    Ok(inliers)
}

/// Statistical Outlier Removal. Returns the retained points in their original order.
pub fn remove_statistical_outliers(
    points: &PointSet,
    k: usize,
    std_ratio: f64,
) -> Result<PointSet> {
    let inliers = statistical_inliers(points, k, std_ratio)?;
    if inliers.len() == points.len() {
        return Ok(points.clone());
    }
    Ok(points.select(&inliers))
}

fn validate(k: usize, std_ratio: f64) -> Result<()> {
    if k == 0 {
        return Err(CloudError::invalid("sor_k", "must be at least 1"));
    }
    if !(std_ratio.is_finite() && std_ratio >= 0.0) {
        return Err(CloudError::invalid(
            "sor_sigma",
            format!("must be finite and non-negative, got {std_ratio}"),
        ));
    }
    Ok(())
}
