use crate::error::{CloudError, Result};

/// Ordered collection of 3D points stored as one contiguous `[x, y, z, x, y, z, ...]` buffer.
///
/// Order is insertion order; duplicates are allowed. Every coordinate is finite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointSet {
    coords: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Bounds {
    pub fn extent(&self) -> [f64; 3] {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }
}

/// Integer grid cell `(⌊x/v⌋, ⌊y/v⌋, ⌊z/v⌋)` for edge length `v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoxelKey {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl VoxelKey {
    // Divide rather than multiply by the inverse so cell boundaries land exactly on
    // multiples of `edge`.
    #[inline]
    pub fn from_point(p: [f64; 3], edge: f64) -> Self {
        VoxelKey {
            x: (p[0] / edge).floor() as i64,
            y: (p[1] / edge).floor() as i64,
            z: (p[2] / edge).floor() as i64,
        }
    }

    #[inline]
    pub fn offset(self, dx: i64, dy: i64, dz: i64) -> Self {
        VoxelKey {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }
}

impl PointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(point_count: usize) -> Self {
        PointSet {
            coords: Vec::with_capacity(point_count * 3),
        }
    }

    /// Takes ownership of a flat coordinate buffer.
    pub fn from_flat(coords: Vec<f64>) -> Result<Self> {
        if coords.len() % 3 != 0 {
            return Err(CloudError::MalformedBuffer(coords.len()));
        }
        if let Some(pos) = coords.iter().position(|c| !c.is_finite()) {
            return Err(CloudError::NonFinite { index: pos / 3 });
        }
        Ok(PointSet { coords })
    }

    pub fn from_points<I>(points: I) -> Result<Self>
    where
        I: IntoIterator<Item = [f64; 3]>,
    {
        let coords: Vec<f64> = points.into_iter().flatten().collect();
        Self::from_flat(coords)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.coords.len() / 3
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    #[inline]
    pub fn point(&self, i: usize) -> [f64; 3] {
        let i3 = i * 3;
        [self.coords[i3], self.coords[i3 + 1], self.coords[i3 + 2]]
    }

    pub fn as_flat(&self) -> &[f64] {
        &self.coords
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = [f64; 3]> + '_ {
        self.coords.chunks_exact(3).map(|c| [c[0], c[1], c[2]])
    }

    pub fn push(&mut self, p: [f64; 3]) -> Result<()> {
        if !p.iter().all(|c| c.is_finite()) {
            return Err(CloudError::NonFinite { index: self.len() });
        }
        self.coords.extend_from_slice(&p);
        Ok(())
    }

    /// Appends `other` after the points of `self`.
    pub fn extend_from(&mut self, other: &PointSet) {
        self.coords.extend_from_slice(&other.coords);
    }

    /// Materializes a retention mask. Indices are emitted in the order given.
    pub fn select(&self, indices: &[usize]) -> PointSet {
        let mut coords = Vec::with_capacity(indices.len() * 3);
        for &i in indices {
            let i3 = i * 3;
            coords.extend_from_slice(&self.coords[i3..i3 + 3]);
        }
        PointSet { coords }
    }

    /// Axis-aligned bounds, `None` for an empty set.
    pub fn bounds(&self) -> Option<Bounds> {
        let mut iter = self.iter();
        let first = iter.next()?;
        let mut min = first;
        let mut max = first;
        for p in iter {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        Some(Bounds { min, max })
    }
}

#[inline]
pub(crate) fn distance_squared(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let dz = b[2] - a[2];
    dx * dx + dy * dy + dz * dz
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_flat_rejects_partial_point() {
        let err = PointSet::from_flat(vec![1.0, 2.0, 3.0, 4.0]).unwrap_err();
        assert!(matches!(err, CloudError::MalformedBuffer(4)));
    }

    #[test]
    fn test_from_flat_rejects_nan() {
        let err = PointSet::from_flat(vec![0.0, 0.0, 0.0, 1.0, f64::NAN, 0.0]).unwrap_err();
        assert!(matches!(err, CloudError::NonFinite { index: 1 }));
    }

    #[test]
    fn test_select_keeps_requested_order() {
        let points =
            PointSet::from_points([[0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [2.0, 2.0, 2.0]]).unwrap();
        let picked = points.select(&[2, 0]);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked.point(0), [2.0, 2.0, 2.0]);
        assert_eq!(picked.point(1), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_bounds() {
        let points = PointSet::from_points([[-1.0, 2.0, 0.5], [3.0, -4.0, 0.0]]).unwrap();
        let bounds = points.bounds().unwrap();
        assert_eq!(bounds.min, [-1.0, -4.0, 0.0]);
        assert_eq!(bounds.max, [3.0, 2.0, 0.5]);
        assert_eq!(bounds.extent(), [4.0, 6.0, 0.5]);
        assert!(PointSet::new().bounds().is_none());
    }

    #[test]
    fn test_voxel_key_floors_negative_coordinates() {
        let key = VoxelKey::from_point([-0.5, 0.5, 1.5], 1.0);
        assert_eq!(key, VoxelKey { x: -1, y: 0, z: 1 });
    }
}
