//! Neighbor queries over a fixed snapshot of a [`PointSet`].
//!
//! [`GridIndex`] buckets points into a hashed uniform grid and answers queries by
//! visiting nearby cells only. [`BruteForceIndex`] scans every point per query; it is
//! O(N) per query (O(N²) per filter pass) and exists as a reference for small inputs
//! and tests, not for production-sized clouds.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use log::debug;
use rustc_hash::FxHashMap;

use crate::error::{CloudError, Result};
use crate::point_set::{distance_squared, PointSet, VoxelKey};

/// Average occupancy the automatic cell size aims for.
const TARGET_POINTS_PER_CELL: f64 = 4.0;

/// Axes thinner than this fraction of the longest axis are treated as flat.
const FLAT_AXIS_RATIO: f64 = 1e-6;

/// Fraction of points ignored at each end of every axis when sizing cells.
const TRIM_FRACTION: f64 = 0.01;

/// Smallest cell edge relative to the largest coordinate magnitude. Keeps keys well
/// inside `i64`.
const MIN_CELL_RATIO: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f64,
}

pub trait NeighborSearch {
    /// Number of indexed points.
    fn len(&self) -> usize;

    /// The `k` nearest other points to point `i`, closest first.
    ///
    /// Equal distances are ordered by ascending point index. Requires `1 <= k < len()`.
    fn k_nearest(&self, i: usize, k: usize) -> Result<Vec<Neighbor>>;

    /// Number of other points within closed distance `radius` of point `i`.
    fn count_within_radius(&self, i: usize, radius: f64) -> Result<usize>;
}

fn check_build(points: &PointSet) -> Result<()> {
    if points.len() < 2 {
        return Err(CloudError::TooFewPoints {
            required: 2,
            actual: points.len(),
        });
    }
    Ok(())
}

fn check_knn(len: usize, i: usize, k: usize) -> Result<()> {
    check_index(len, i)?;
    if k == 0 || k >= len {
        return Err(CloudError::invalid(
            "k",
            format!("must satisfy 1 <= k < {len}, got {k}"),
        ));
    }
    Ok(())
}

fn check_radius_query(len: usize, i: usize, radius: f64) -> Result<()> {
    check_index(len, i)?;
    if !(radius.is_finite() && radius > 0.0) {
        return Err(CloudError::invalid(
            "radius",
            format!("must be positive and finite, got {radius}"),
        ));
    }
    Ok(())
}

fn check_index(len: usize, i: usize) -> Result<()> {
    if i >= len {
        return Err(CloudError::invalid(
            "index",
            format!("{i} out of range for {len} points"),
        ));
    }
    Ok(())
}

/// Max-heap entry ordered by squared distance, then index.
#[derive(Clone, Copy)]
struct Candidate {
    dist_sq: f64,
    index: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist_sq
            .total_cmp(&other.dist_sq)
            .then_with(|| self.index.cmp(&other.index))
    }
}

/// Bounded collection of the `k` smallest candidates seen so far.
struct TopK {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl TopK {
    fn new(k: usize) -> Self {
        TopK {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    #[inline]
    fn offer(&mut self, candidate: Candidate) {
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    fn worst_dist_sq(&self) -> Option<f64> {
        if self.heap.len() < self.k {
            None
        } else {
            self.heap.peek().map(|c| c.dist_sq)
        }
    }

    fn into_neighbors(self) -> Vec<Neighbor> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| Neighbor {
                index: c.index,
                distance: c.dist_sq.sqrt(),
            })
            .collect()
    }
}

/// Hashed uniform grid over a borrowed point snapshot.
pub struct GridIndex<'a> {
    points: &'a PointSet,
    cell_size: f64,
    cells: FxHashMap<VoxelKey, Vec<u32>>,
    min_key: VoxelKey,
    max_key: VoxelKey,
    // Absolute rounding allowance for key assignment at this coordinate magnitude.
    slack: f64,
}

impl<'a> GridIndex<'a> {
    /// Builds a grid whose cell size is derived from the point density of the cloud.
    pub fn build(points: &'a PointSet) -> Result<Self> {
        check_build(points)?;
        Self::with_cell_size(points, auto_cell_size(points))
    }

    /// Builds a grid with the given cell edge, raised if needed so that grid keys stay
    /// small for this coordinate range.
    pub fn with_cell_size(points: &'a PointSet, cell_size: f64) -> Result<Self> {
        check_build(points)?;
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(CloudError::invalid(
                "cell_size",
                format!("must be positive and finite, got {cell_size}"),
            ));
        }

        let max_abs = points.as_flat().iter().fold(0.0f64, |m, c| m.max(c.abs()));
        let floor = max_abs * MIN_CELL_RATIO;
        let cell_size = if cell_size < floor {
            debug!("grid index: cell size {cell_size:e} raised to {floor:e}");
            floor
        } else {
            cell_size
        };

        let point_count = points.len();
        let estimated_cells = (point_count / TARGET_POINTS_PER_CELL as usize).max(16);
        let mut cells: FxHashMap<VoxelKey, Vec<u32>> =
            FxHashMap::with_capacity_and_hasher(estimated_cells, Default::default());

        let mut min_key = VoxelKey::from_point(points.point(0), cell_size);
        let mut max_key = min_key;

        for (i, p) in points.iter().enumerate() {
            let key = VoxelKey::from_point(p, cell_size);
            min_key = VoxelKey {
                x: min_key.x.min(key.x),
                y: min_key.y.min(key.y),
                z: min_key.z.min(key.z),
            };
            max_key = VoxelKey {
                x: max_key.x.max(key.x),
                y: max_key.y.max(key.y),
                z: max_key.z.max(key.z),
            };
            cells.entry(key).or_default().push(i as u32);
        }

        debug!(
            "grid index: {} points in {} cells (cell size {:.6})",
            point_count,
            cells.len(),
            cell_size
        );

        Ok(GridIndex {
            points,
            cell_size,
            cells,
            min_key,
            max_key,
            slack: 4.0 * f64::EPSILON * max_abs.max(cell_size),
        })
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    fn cell(&self, key: &VoxelKey) -> &[u32] {
        self.cells.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn clamp_key(&self, key: VoxelKey) -> VoxelKey {
        VoxelKey {
            x: key.x.clamp(self.min_key.x, self.max_key.x),
            y: key.y.clamp(self.min_key.y, self.max_key.y),
            z: key.z.clamp(self.min_key.z, self.max_key.z),
        }
    }

    /// Inclusive range of occupied-grid keys that can hold points within `radius` of
    /// `query`. The rounding slack only widens it where the query box touches a cell face.
    fn radius_block(&self, query: [f64; 3], radius: f64) -> (VoxelKey, VoxelKey) {
        let reach = radius + self.slack;
        let lo = VoxelKey::from_point(
            [query[0] - reach, query[1] - reach, query[2] - reach],
            self.cell_size,
        );
        let hi = VoxelKey::from_point(
            [query[0] + reach, query[1] + reach, query[2] + reach],
            self.cell_size,
        );
        (self.clamp_key(lo), self.clamp_key(hi))
    }

    /// Chebyshev shell radius beyond which no occupied cell exists.
    fn last_shell(&self, center: VoxelKey) -> i64 {
        let spans = [
            (center.x - self.min_key.x).max(self.max_key.x - center.x),
            (center.y - self.min_key.y).max(self.max_key.y - center.y),
            (center.z - self.min_key.z).max(self.max_key.z - center.z),
        ];
        spans.into_iter().max().unwrap_or(0)
    }

    /// Calls `visit` for every cell at Chebyshev distance exactly `shell` from `center`.
    fn for_each_shell_cell(&self, center: VoxelKey, shell: i64, mut visit: impl FnMut(&[u32])) {
        if shell == 0 {
            visit(self.cell(&center));
            return;
        }
        for dx in -shell..=shell {
            for dy in -shell..=shell {
                if dx.abs() == shell || dy.abs() == shell {
                    for dz in -shell..=shell {
                        visit(self.cell(&center.offset(dx, dy, dz)));
                    }
                } else {
                    visit(self.cell(&center.offset(dx, dy, -shell)));
                    visit(self.cell(&center.offset(dx, dy, shell)));
                }
            }
        }
    }
}

impl NeighborSearch for GridIndex<'_> {
    fn len(&self) -> usize {
        self.points.len()
    }

    fn k_nearest(&self, i: usize, k: usize) -> Result<Vec<Neighbor>> {
        check_knn(self.len(), i, k)?;
        let query = self.points.point(i);
        let center = VoxelKey::from_point(query, self.cell_size);
        let last_shell = self.last_shell(center);
        let mut best = TopK::new(k);

        for shell in 0..=last_shell {
            if shell_cell_count(shell) > self.cells.len() {
                // Sparse region: cheaper to scan the remaining occupied cells directly.
                for (key, cell) in &self.cells {
                    if chebyshev(*key, center) < shell {
                        continue;
                    }
                    for &j in cell {
                        let j = j as usize;
                        if j != i {
                            best.offer(Candidate {
                                dist_sq: distance_squared(query, self.points.point(j)),
                                index: j,
                            });
                        }
                    }
                }
                break;
            }

            self.for_each_shell_cell(center, shell, |cell| {
                for &j in cell {
                    let j = j as usize;
                    if j == i {
                        continue;
                    }
                    best.offer(Candidate {
                        dist_sq: distance_squared(query, self.points.point(j)),
                        index: j,
                    });
                }
            });

            // Everything outside the visited block is at least `shell` cells away.
            if let Some(worst) = best.worst_dist_sq() {
                let reach = shell as f64 * self.cell_size - self.slack;
                if reach > 0.0 && worst < reach * reach {
                    break;
                }
            }
        }

        Ok(best.into_neighbors())
    }

    fn count_within_radius(&self, i: usize, radius: f64) -> Result<usize> {
        check_radius_query(self.len(), i, radius)?;
        let query = self.points.point(i);
        let radius_squared = radius * radius;
        let (lo, hi) = self.radius_block(query, radius);

        let mut count = 0;
        let mut count_cell = |cell: &[u32]| {
            for &j in cell {
                let j = j as usize;
                if j != i && distance_squared(query, self.points.point(j)) <= radius_squared {
                    count += 1;
                }
            }
        };

        let span = |lo: i64, hi: i64| (hi as i128 - lo as i128 + 1) as u128;
        let block_cells = span(lo.x, hi.x)
            .saturating_mul(span(lo.y, hi.y))
            .saturating_mul(span(lo.z, hi.z));
        if block_cells > self.cells.len() as u128 {
            for (key, cell) in &self.cells {
                let inside = (lo.x..=hi.x).contains(&key.x)
                    && (lo.y..=hi.y).contains(&key.y)
                    && (lo.z..=hi.z).contains(&key.z);
                if inside {
                    count_cell(cell);
                }
            }
            return Ok(count);
        }

        for x in lo.x..=hi.x {
            for y in lo.y..=hi.y {
                for z in lo.z..=hi.z {
                    count_cell(self.cell(&VoxelKey { x, y, z }));
                }
            }
        }
        Ok(count)
    }
}

fn chebyshev(a: VoxelKey, b: VoxelKey) -> i64 {
    (a.x - b.x).abs().max((a.y - b.y).abs()).max((a.z - b.z).abs())
}

/// Number of cells at Chebyshev distance exactly `shell` from a cell.
fn shell_cell_count(shell: i64) -> usize {
    if shell == 0 {
        return 1;
    }
    let outer = (2 * shell + 1) as usize;
    let inner = (2 * shell - 1) as usize;
    match (outer.checked_pow(3), inner.checked_pow(3)) {
        (Some(outer), Some(inner)) => outer - inner,
        _ => usize::MAX,
    }
}

/// Cell edge giving roughly [`TARGET_POINTS_PER_CELL`] points per occupied cell.
///
/// Density is measured over the trimmed extent of the non-flat axes, so a handful of
/// distant outliers do not inflate the cells of the dense bulk.
fn auto_cell_size(points: &PointSet) -> f64 {
    let point_count = points.len();
    cell_for_extent(trimmed_extent(points), point_count)
        .or_else(|| {
            points
                .bounds()
                .and_then(|b| cell_for_extent(b.extent(), point_count))
        })
        // Every point coincides.
        .unwrap_or(1.0)
}

/// Per-axis distance between the `TRIM_FRACTION` and `1 - TRIM_FRACTION` quantiles.
fn trimmed_extent(points: &PointSet) -> [f64; 3] {
    let n = points.len();
    if n == 0 {
        return [0.0; 3];
    }
    let low_rank = ((n - 1) as f64 * TRIM_FRACTION).floor() as usize;
    let high_rank = n - 1 - low_rank;

    let mut extent = [0.0; 3];
    let mut values = Vec::with_capacity(n);
    for (axis, e) in extent.iter_mut().enumerate() {
        values.clear();
        values.extend(points.iter().map(|p| p[axis]));
        let low = *values.select_nth_unstable_by(low_rank, f64::total_cmp).1;
        let high = *values.select_nth_unstable_by(high_rank, f64::total_cmp).1;
        *e = high - low;
    }
    extent
}

fn cell_for_extent(extent: [f64; 3], point_count: usize) -> Option<f64> {
    let longest = extent.iter().cloned().fold(0.0f64, f64::max);
    if !(longest > 0.0) {
        return None;
    }

    let mut measure = 1.0;
    let mut dims = 0;
    for e in extent {
        if e > longest * FLAT_AXIS_RATIO {
            measure *= e;
            dims += 1;
        }
    }
    let cell = (measure * TARGET_POINTS_PER_CELL / point_count as f64).powf(1.0 / dims as f64);
    if cell.is_finite() && cell > 0.0 {
        Some(cell)
    } else {
        Some(longest)
    }
}

/// Exhaustive reference index. Not suitable for large clouds.
pub struct BruteForceIndex<'a> {
    points: &'a PointSet,
}

impl<'a> BruteForceIndex<'a> {
    pub fn build(points: &'a PointSet) -> Result<Self> {
        check_build(points)?;
        Ok(BruteForceIndex { points })
    }
}

impl NeighborSearch for BruteForceIndex<'_> {
    fn len(&self) -> usize {
        self.points.len()
    }

    fn k_nearest(&self, i: usize, k: usize) -> Result<Vec<Neighbor>> {
        check_knn(self.len(), i, k)?;
        let query = self.points.point(i);
        let mut best = TopK::new(k);
        for (j, p) in self.points.iter().enumerate() {
            if j != i {
                best.offer(Candidate {
                    dist_sq: distance_squared(query, p),
                    index: j,
                });
            }
        }
        Ok(best.into_neighbors())
    }

    fn count_within_radius(&self, i: usize, radius: f64) -> Result<usize> {
        check_radius_query(self.len(), i, radius)?;
        let query = self.points.point(i);
        let radius_squared = radius * radius;
        Ok(self
            .points
            .iter()
            .enumerate()
            .filter(|&(j, p)| j != i && distance_squared(query, p) <= radius_squared)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn random_cloud(n: usize, seed: u64) -> PointSet {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        PointSet::from_points((0..n).map(|_| {
            [
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-5.0..5.0),
                rng.gen_range(-0.5..0.5),
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_build_requires_two_points() {
        let single = PointSet::from_points([[0.0, 0.0, 0.0]]).unwrap();
        assert!(matches!(
            GridIndex::build(&single),
            Err(CloudError::TooFewPoints { actual: 1, .. })
        ));
        assert!(BruteForceIndex::build(&PointSet::new()).is_err());
    }

    #[test]
    fn test_grid_knn_matches_brute_force() {
        let points = random_cloud(400, 3);
        let grid = GridIndex::build(&points).unwrap();
        let brute = BruteForceIndex::build(&points).unwrap();
        for i in (0..points.len()).step_by(7) {
            for k in [1, 5, 20] {
                let a = grid.k_nearest(i, k).unwrap();
                let b = brute.k_nearest(i, k).unwrap();
                assert_eq!(a, b, "point {i}, k {k}");
            }
        }
    }

    #[test]
    fn test_grid_radius_matches_brute_force() {
        let points = random_cloud(300, 11);
        let brute = BruteForceIndex::build(&points).unwrap();
        for radius in [0.1, 0.5, 1.3] {
            let grid = GridIndex::with_cell_size(&points, radius).unwrap();
            let auto = GridIndex::build(&points).unwrap();
            for i in 0..points.len() {
                let expected = brute.count_within_radius(i, radius).unwrap();
                assert_eq!(grid.count_within_radius(i, radius).unwrap(), expected);
                assert_eq!(auto.count_within_radius(i, radius).unwrap(), expected);
            }
        }
    }

    #[test]
    fn test_knn_ties_break_by_index() {
        // Four points at distance 1 from the origin point.
        let points = PointSet::from_points([
            [0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, -1.0, 0.0],
            [-1.0, 0.0, 0.0],
        ])
        .unwrap();
        let grid = GridIndex::build(&points).unwrap();
        let nearest = grid.k_nearest(0, 3).unwrap();
        let indices: Vec<usize> = nearest.iter().map(|n| n.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(nearest.iter().all(|n| n.distance == 1.0));
    }

    #[test]
    fn test_radius_is_closed_and_excludes_self() {
        let points =
            PointSet::from_points([[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [2.0, 0.0, 0.0]]).unwrap();
        let grid = GridIndex::build(&points).unwrap();
        assert_eq!(grid.count_within_radius(0, 2.0).unwrap(), 2);
        assert_eq!(grid.count_within_radius(0, 1.999).unwrap(), 0);
        assert_eq!(grid.count_within_radius(1, 0.5).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_points() {
        let points = PointSet::from_points([[1.0, 1.0, 1.0]; 6]).unwrap();
        let grid = GridIndex::build(&points).unwrap();
        let nearest = grid.k_nearest(2, 5).unwrap();
        assert_eq!(nearest.len(), 5);
        assert!(nearest.iter().all(|n| n.distance == 0.0 && n.index != 2));
    }

    #[test]
    fn test_query_contract_violations() {
        let points = random_cloud(10, 1);
        let grid = GridIndex::build(&points).unwrap();
        assert!(grid.k_nearest(0, 0).is_err());
        assert!(grid.k_nearest(0, 10).is_err());
        assert!(grid.k_nearest(10, 1).is_err());
        assert!(grid.count_within_radius(0, 0.0).is_err());
        assert!(grid.count_within_radius(0, f64::NAN).is_err());
    }

    #[test]
    fn test_isolated_far_point() {
        let mut points = random_cloud(200, 5);
        points.push([0.0, 0.0, 5000.0]).unwrap();
        let far = points.len() - 1;
        let grid = GridIndex::build(&points).unwrap();
        let brute = BruteForceIndex::build(&points).unwrap();
        assert_eq!(grid.k_nearest(far, 4).unwrap(), brute.k_nearest(far, 4).unwrap());
        assert_eq!(grid.k_nearest(0, 4).unwrap(), brute.k_nearest(0, 4).unwrap());
        assert_eq!(grid.count_within_radius(far, 4999.0).unwrap(), 0);
        assert_eq!(
            grid.count_within_radius(far, 6000.0).unwrap(),
            brute.count_within_radius(far, 6000.0).unwrap()
        );
    }

    fn flat_grid(side: usize, spacing: f64) -> PointSet {
        PointSet::from_points((0..side * side).map(|i| {
            [
                (i % side) as f64 * spacing,
                (i / side) as f64 * spacing,
                0.0,
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_auto_cell_size_on_flat_plane() {
        // 101 x 101 lattice over [0, 10]^2; trimming drops one row at each end.
        let points = flat_grid(101, 0.1);
        let cell = auto_cell_size(&points);
        let trimmed = 10.0 - 2.0 * 0.1;
        let expected = (trimmed * trimmed * 4.0 / points.len() as f64).sqrt();
        assert!((cell - expected).abs() < 1e-9, "{cell} vs {expected}");
    }

    #[test]
    fn test_far_outlier_does_not_coarsen_grid() {
        let plane = flat_grid(60, 0.1);
        let mut with_outlier = plane.clone();
        with_outlier.push([3.0, 3.0, 10_000.0]).unwrap();

        let clean = GridIndex::build(&plane).unwrap();
        let dirty = GridIndex::build(&with_outlier).unwrap();
        let ratio = dirty.cell_size() / clean.cell_size();
        assert!((0.9..1.1).contains(&ratio), "cell size ratio {ratio}");
        assert!(dirty.occupied_cells() > plane.len() / 8, "{} cells", dirty.occupied_cells());

        let brute = BruteForceIndex::build(&with_outlier).unwrap();
        for i in [0, 1234, with_outlier.len() - 1] {
            assert_eq!(dirty.k_nearest(i, 20).unwrap(), brute.k_nearest(i, 20).unwrap());
        }
    }

    #[test]
    fn test_tiny_radius_and_cell_size() {
        let points = random_cloud(100, 9);
        let grid = GridIndex::with_cell_size(&points, 1e-300).unwrap();
        assert!(grid.cell_size() > 1e-300);
        let brute = BruteForceIndex::build(&points).unwrap();
        for i in 0..points.len() {
            assert_eq!(grid.count_within_radius(i, 1e-300).unwrap(), 0);
            assert_eq!(
                grid.count_within_radius(i, 0.7).unwrap(),
                brute.count_within_radius(i, 0.7).unwrap()
            );
        }
        let auto = GridIndex::build(&points).unwrap();
        assert_eq!(auto.count_within_radius(0, 1e-300).unwrap(), 0);
        assert_eq!(auto.count_within_radius(0, 1e300).unwrap(), 99);
    }

    #[test]
    fn test_radius_block_stays_within_three_cells_per_axis() {
        let points = random_cloud(500, 21);
        let radius = 0.4;
        let grid = GridIndex::with_cell_size(&points, radius).unwrap();
        for p in points.iter() {
            let (lo, hi) = grid.radius_block(p, radius);
            assert!(hi.x - lo.x <= 2 && hi.y - lo.y <= 2 && hi.z - lo.z <= 2);
        }
    }
}
