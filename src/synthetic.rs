//! Synthetic test clouds: a jittered z≈0 plane with optional holes, plus a box of
//! uniformly scattered outliers above or below it.

use log::debug;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{CloudError, Result};
use crate::point_set::PointSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneParams {
    pub point_count: usize,
    /// Side of the square `[-size/2, size/2]²`.
    pub size: f64,
    /// Standard deviation of the Gaussian z jitter.
    pub noise: f64,
    /// Probability of dropping each point.
    pub hole_ratio: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierParams {
    pub count: usize,
    pub box_xy: f64,
    pub z_min: f64,
    pub z_max: f64,
}

impl PlaneParams {
    pub fn validate(&self) -> Result<()> {
        if self.point_count == 0 {
            return Err(CloudError::invalid("n", "must be greater than 0"));
        }
        if !(self.size.is_finite() && self.size > 0.0) {
            return Err(CloudError::invalid(
                "size",
                format!("must be positive, got {}", self.size),
            ));
        }
        if !(self.noise.is_finite() && self.noise >= 0.0) {
            return Err(CloudError::invalid(
                "noise",
                format!("must be non-negative, got {}", self.noise),
            ));
        }
        if !(0.0..1.0).contains(&self.hole_ratio) {
            return Err(CloudError::invalid(
                "hole",
                format!("must be in [0, 1), got {}", self.hole_ratio),
            ));
        }
        Ok(())
    }
}

impl OutlierParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.box_xy.is_finite() && self.box_xy > 0.0) {
            return Err(CloudError::invalid(
                "outlier_box",
                format!("must be positive, got {}", self.box_xy),
            ));
        }
        if !(self.z_min.is_finite() && self.z_max.is_finite() && self.z_min < self.z_max) {
            return Err(CloudError::invalid(
                "outlier_z_min",
                format!(
                    "must be below outlier_z_max, got [{}, {}]",
                    self.z_min, self.z_max
                ),
            ));
        }
        Ok(())
    }
}

/// Uniform plane in `[-size/2, size/2)²` with optional z noise and random holes.
///
/// The stream is consumed as all x, all y, then the noise, then the hole mask, so the
/// first three depend only on the seed and point count.
pub fn generate_plane<R: Rng + ?Sized>(params: &PlaneParams, rng: &mut R) -> Result<PointSet> {
    params.validate()?;
    let n = params.point_count;
    let half = params.size / 2.0;

    let xs: Vec<f64> = (0..n).map(|_| rng.gen_range(-half..half)).collect();
    let ys: Vec<f64> = (0..n).map(|_| rng.gen_range(-half..half)).collect();
    let mut zs = vec![0.0f64; n];

    if params.noise > 0.0 {
        let normal = Normal::new(0.0, params.noise)
            .map_err(|e| CloudError::invalid("noise", e.to_string()))?;
        for z in zs.iter_mut() {
            *z += normal.sample(rng);
        }
    }

    let keep: Vec<bool> = if params.hole_ratio > 0.0 {
        (0..n).map(|_| rng.gen::<f64>() > params.hole_ratio).collect()
    } else {
        vec![true; n]
    };

    let mut plane = PointSet::with_capacity(n);
    for i in (0..n).filter(|&i| keep[i]) {
        plane.push([xs[i], ys[i], zs[i]])?;
    }

    debug!(
        "plane: {} of {} points kept (hole ratio {})",
        plane.len(),
        n,
        params.hole_ratio
    );
    Ok(plane)
}

/// `count` points uniform in `[-box/2, box/2)² × [z_min, z_max]`.
pub fn generate_outliers<R: Rng + ?Sized>(params: &OutlierParams, rng: &mut R) -> Result<PointSet> {
    params.validate()?;
    let half = params.box_xy / 2.0;
    let n = params.count;

    let xs: Vec<f64> = (0..n).map(|_| rng.gen_range(-half..half)).collect();
    let ys: Vec<f64> = (0..n).map(|_| rng.gen_range(-half..half)).collect();
    let zs: Vec<f64> = (0..n)
        .map(|_| rng.gen_range(params.z_min..=params.z_max))
        .collect();

    let mut outliers = PointSet::with_capacity(n);
    for i in 0..n {
        outliers.push([xs[i], ys[i], zs[i]])?;
    }
    Ok(outliers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random_sample::seeded_rng;

    fn plane(point_count: usize, noise: f64, hole_ratio: f64) -> PlaneParams {
        PlaneParams {
            point_count,
            size: 10.0,
            noise,
            hole_ratio,
        }
    }

    #[test]
    fn test_flat_plane_exact_count() {
        let points = generate_plane(&plane(500, 0.0, 0.0), &mut seeded_rng(Some(42))).unwrap();
        assert_eq!(points.len(), 500);
        assert!(points.iter().all(|p| p[2] == 0.0));
        assert!(points
            .iter()
            .all(|p| (-5.0..5.0).contains(&p[0]) && (-5.0..5.0).contains(&p[1])));
    }

    #[test]
    fn test_noise_moves_z_only_slightly() {
        let points = generate_plane(&plane(2000, 0.01, 0.0), &mut seeded_rng(Some(1))).unwrap();
        assert!(points.iter().any(|p| p[2] != 0.0));
        assert!(points.iter().all(|p| p[2].abs() < 0.1));
    }

    #[test]
    fn test_holes_drop_roughly_expected_share() {
        let points = generate_plane(&plane(10_000, 0.0, 0.3), &mut seeded_rng(Some(5))).unwrap();
        let kept = points.len() as f64;
        assert!((6_500.0..7_500.0).contains(&kept), "kept {kept}");
    }

    #[test]
    fn test_outliers_in_box() {
        let params = OutlierParams {
            count: 300,
            box_xy: 4.0,
            z_min: 0.3,
            z_max: 1.0,
        };
        let outliers = generate_outliers(&params, &mut seeded_rng(Some(43))).unwrap();
        assert_eq!(outliers.len(), 300);
        for p in outliers.iter() {
            assert!((-2.0..2.0).contains(&p[0]));
            assert!((-2.0..2.0).contains(&p[1]));
            assert!((0.3..=1.0).contains(&p[2]));
        }
    }

    #[test]
    fn test_invalid_parameters() {
        let mut rng = seeded_rng(Some(0));
        assert!(generate_plane(&plane(0, 0.0, 0.0), &mut rng).is_err());
        assert!(generate_plane(&plane(10, -1.0, 0.0), &mut rng).is_err());
        assert!(generate_plane(&plane(10, 0.0, 1.0), &mut rng).is_err());
        let inverted = OutlierParams {
            count: 3,
            box_xy: 1.0,
            z_min: 1.0,
            z_max: 0.5,
        };
        assert!(generate_outliers(&inverted, &mut rng).is_err());
    }
}
