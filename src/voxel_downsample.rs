use log::debug;
use rustc_hash::FxHashMap;

use crate::error::{CloudError, Result};
use crate::point_set::{PointSet, VoxelKey};

// Running sums for one occupied voxel
#[derive(Clone, Copy)]
struct Voxel {
    count: u32,
    sum_x: f64,
    sum_y: f64,
    sum_z: f64,
}

/// Collapses every occupied voxel of edge `voxel_size` to the centroid of its points.
///
/// Output order is the order in which each voxel was first hit while scanning the input.
pub fn voxel_downsample(points: &PointSet, voxel_size: f64) -> Result<PointSet> {
    if !(voxel_size.is_finite() && voxel_size > 0.0) {
        return Err(CloudError::invalid(
            "voxel",
            format!("must be positive and finite, got {voxel_size}"),
        ));
    }

    let point_count = points.len();

    // Pre-allocate with estimated capacity to avoid reallocations
    let estimated_voxels = (point_count / 8).clamp(16, 100_000);
    let mut slots: FxHashMap<VoxelKey, usize> =
        FxHashMap::with_capacity_and_hasher(estimated_voxels, Default::default());
    let mut voxels: Vec<Voxel> = Vec::with_capacity(estimated_voxels);

    for p in points.iter() {
        let key = VoxelKey::from_point(p, voxel_size);
        let slot = *slots.entry(key).or_insert_with(|| {
            voxels.push(Voxel {
                count: 0,
                sum_x: 0.0,
                sum_y: 0.0,
                sum_z: 0.0,
            });
            voxels.len() - 1
        });
        let voxel = &mut voxels[slot];
        voxel.count += 1;
        voxel.sum_x += p[0];
        voxel.sum_y += p[1];
        voxel.sum_z += p[2];
    }

    let mut downsampled = PointSet::with_capacity(voxels.len());
    for voxel in &voxels {
        let count_f = voxel.count as f64;
        downsampled.push([
            voxel.sum_x / count_f,
            voxel.sum_y / count_f,
            voxel.sum_z / count_f,
        ])?;
    }

    debug!(
        "voxel {}: {} points -> {} voxels",
        voxel_size,
        point_count,
        downsampled.len()
    );
    Ok(downsampled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sorted(points: &PointSet) -> Vec<[f64; 3]> {
        let mut out: Vec<[f64; 3]> = points.iter().collect();
        out.sort_by(|a, b| {
            a[0].total_cmp(&b[0])
                .then(a[1].total_cmp(&b[1]))
                .then(a[2].total_cmp(&b[2]))
        });
        out
    }

    #[test]
    fn test_voxel_downsample_simple() {
        // 4 points forming a square inside one voxel
        let points = PointSet::from_points([
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 1.0, 0.0],
        ])
        .unwrap();
        let result = voxel_downsample(&points, 2.0).unwrap();
        assert_eq!(result.len(), 1);
        let c = result.point(0);
        assert_abs_diff_eq!(c[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(c[1], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(c[2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_voxel_downsample_empty() {
        let result = voxel_downsample(&PointSet::new(), 1.0).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_voxel_downsample_separate_voxels() {
        let points = PointSet::from_points([
            [0.2, 0.2, 0.2],
            [2.5, 0.0, 0.0],
            [0.4, 0.4, 0.4],
            [-0.5, 0.0, 0.0],
        ])
        .unwrap();
        let result = voxel_downsample(&points, 1.0).unwrap();
        let expected = [[-0.5, 0.0, 0.0], [0.3, 0.3, 0.3], [2.5, 0.0, 0.0]];
        let got = sorted(&result);
        assert_eq!(got.len(), expected.len());
        for (a, b) in got.iter().zip(expected.iter()) {
            for axis in 0..3 {
                assert_abs_diff_eq!(a[axis], b[axis], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_voxel_downsample_is_idempotent() {
        let mut points = PointSet::new();
        for i in 0..200 {
            let t = i as f64;
            points
                .push([(t * 0.731) % 10.0 - 5.0, (t * 0.419) % 10.0 - 5.0, (t * 0.257) % 1.0])
                .unwrap();
        }
        let once = voxel_downsample(&points, 1.0).unwrap();
        let twice = voxel_downsample(&once, 1.0).unwrap();
        assert_eq!(once.len(), twice.len());
        for (a, b) in sorted(&once).iter().zip(sorted(&twice).iter()) {
            for axis in 0..3 {
                assert_abs_diff_eq!(a[axis], b[axis], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_rejects_non_positive_voxel() {
        let points = PointSet::from_points([[0.0, 0.0, 0.0]]).unwrap();
        assert!(voxel_downsample(&points, 0.0).is_err());
        assert!(voxel_downsample(&points, -0.5).is_err());
    }
}
