use log::debug;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::point_set::PointSet;

/// Seeded generator used by every random stage. `None` draws a seed from the OS.
pub fn seeded_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

/// Draws `target` distinct indices out of `0..point_count`, sorted ascending.
///
/// Returns every index when `target >= point_count`.
pub fn sample_indices<R: Rng + ?Sized>(
    point_count: usize,
    target: usize,
    rng: &mut R,
) -> Vec<usize> {
    if target >= point_count {
        return (0..point_count).collect();
    }
    let mut picked = index::sample(rng, point_count, target).into_vec();
    picked.sort_unstable();
    picked
}

/// Uniform subsample without replacement, keeping the original relative order.
pub fn random_sample<R: Rng + ?Sized>(points: &PointSet, target: usize, rng: &mut R) -> PointSet {
    if target >= points.len() {
        return points.clone();
    }
    let picked = sample_indices(points.len(), target, rng);
    debug!("random sample: {} -> {} points", points.len(), picked.len());
    points.select(&picked)
}
