use nalgebra::{Point3, Vector3};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GridError {
    #[error("Grid dimension {axis} is zero")]
    ZeroDimension { axis: usize },

    #[error("Grid spacing on axis {axis} is not positive: {value} mm")]
    NonPositiveSpacing { axis: usize, value: f64 },

    #[error("Grid geometries do not match (dims {left:?} vs {right:?})")]
    GeometryMismatch {
        left: [usize; 3],
        right: [usize; 3],
    },
}

/// Regular 3-D voxel grid geometry in the patient coordinate frame.
///
/// Spacing and origin are immutable after creation; all co-registered data
/// (densities, dose, structure masks) index into the same linearized layout
/// with `x` fastest and `z` slowest.
#[derive(Debug, Clone, PartialEq)]
pub struct GridGeometry {
    dims: [usize; 3],
    spacing: Vector3<f64>,
    origin: Point3<f64>,
}

impl GridGeometry {
    pub fn new(
        dims: [usize; 3],
        spacing: Vector3<f64>,
        origin: Point3<f64>,
    ) -> Result<Self, GridError> {
        for (axis, &d) in dims.iter().enumerate() {
            if d == 0 {
                return Err(GridError::ZeroDimension { axis });
            }
        }
        for axis in 0..3 {
            if !(spacing[axis] > 0.0) || !spacing[axis].is_finite() {
                return Err(GridError::NonPositiveSpacing {
                    axis,
                    value: spacing[axis],
                });
            }
        }
        Ok(Self {
            dims,
            spacing,
            origin,
        })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn spacing(&self) -> Vector3<f64> {
        self.spacing
    }

    pub fn origin(&self) -> Point3<f64> {
        self.origin
    }

    #[inline]
    pub fn voxel_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    #[inline]
    pub fn linear_index(&self, i: usize, j: usize, k: usize) -> usize {
        (k * self.dims[1] + j) * self.dims[0] + i
    }

    #[inline]
    pub fn voxel_coords(&self, index: usize) -> (usize, usize, usize) {
        let i = index % self.dims[0];
        let j = (index / self.dims[0]) % self.dims[1];
        let k = index / (self.dims[0] * self.dims[1]);
        (i, j, k)
    }

    /// Center of voxel `(i, j, k)` in patient coordinates (mm).
    #[inline]
    pub fn voxel_center(&self, i: usize, j: usize, k: usize) -> Point3<f64> {
        self.origin
            + Vector3::new(
                (i as f64 + 0.5) * self.spacing.x,
                (j as f64 + 0.5) * self.spacing.y,
                (k as f64 + 0.5) * self.spacing.z,
            )
    }

    /// Continuous voxel coordinates of a world point (voxel centers at 0.5 offsets).
    #[inline]
    pub fn world_to_voxel(&self, p: &Point3<f64>) -> Vector3<f64> {
        let rel = p - self.origin;
        Vector3::new(
            rel.x / self.spacing.x,
            rel.y / self.spacing.y,
            rel.z / self.spacing.z,
        )
    }

    /// Axis-aligned bounding box (min corner, max corner) in patient coordinates.
    pub fn aabb(&self) -> (Point3<f64>, Point3<f64>) {
        let extent = Vector3::new(
            self.dims[0] as f64 * self.spacing.x,
            self.dims[1] as f64 * self.spacing.y,
            self.dims[2] as f64 * self.spacing.z,
        );
        (self.origin, self.origin + extent)
    }

    pub fn contains_point(&self, p: &Point3<f64>) -> bool {
        let (lo, hi) = self.aabb();
        p.x >= lo.x && p.x <= hi.x && p.y >= lo.y && p.y <= hi.y && p.z >= lo.z && p.z <= hi.z
    }

    /// Trilinear interpolation of a co-registered scalar field at a world point.
    ///
    /// Returns `None` outside the grid extent. The same scheme is used for
    /// density input and dose output resampling so that a round trip at
    /// matching resolutions is the identity.
    pub fn sample_trilinear(&self, values: &[f64], p: &Point3<f64>) -> Option<f64> {
        if !self.contains_point(p) {
            return None;
        }
        let v = self.world_to_voxel(p);
        let fx = (v.x - 0.5).clamp(0.0, self.dims[0] as f64 - 1.0);
        let fy = (v.y - 0.5).clamp(0.0, self.dims[1] as f64 - 1.0);
        let fz = (v.z - 0.5).clamp(0.0, self.dims[2] as f64 - 1.0);

        let i0 = fx.floor() as usize;
        let j0 = fy.floor() as usize;
        let k0 = fz.floor() as usize;
        let i1 = (i0 + 1).min(self.dims[0] - 1);
        let j1 = (j0 + 1).min(self.dims[1] - 1);
        let k1 = (k0 + 1).min(self.dims[2] - 1);

        let tx = fx - i0 as f64;
        let ty = fy - j0 as f64;
        let tz = fz - k0 as f64;

        let at = |i: usize, j: usize, k: usize| values[self.linear_index(i, j, k)];

        let c00 = at(i0, j0, k0) * (1.0 - tx) + at(i1, j0, k0) * tx;
        let c10 = at(i0, j1, k0) * (1.0 - tx) + at(i1, j1, k0) * tx;
        let c01 = at(i0, j0, k1) * (1.0 - tx) + at(i1, j0, k1) * tx;
        let c11 = at(i0, j1, k1) * (1.0 - tx) + at(i1, j1, k1) * tx;

        let c0 = c00 * (1.0 - ty) + c10 * ty;
        let c1 = c01 * (1.0 - ty) + c11 * ty;

        Some(c0 * (1.0 - tz) + c1 * tz)
    }

    /// Geometry covering the same physical extent at a different voxel spacing.
    pub fn with_spacing(&self, spacing: Vector3<f64>) -> Result<GridGeometry, GridError> {
        let (lo, hi) = self.aabb();
        let extent = hi - lo;
        let dims = [
            (extent.x / spacing.x).round().max(1.0) as usize,
            (extent.y / spacing.y).round().max(1.0) as usize,
            (extent.z / spacing.z).round().max(1.0) as usize,
        ];
        GridGeometry::new(dims, spacing, lo)
    }

    pub fn check_same(&self, other: &GridGeometry) -> Result<(), GridError> {
        if self != other {
            return Err(GridError::GeometryMismatch {
                left: self.dims,
                right: other.dims,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> GridGeometry {
        GridGeometry::new(
            [4, 3, 2],
            Vector3::new(2.0, 2.0, 2.0),
            Point3::new(-4.0, -3.0, -2.0),
        )
        .unwrap()
    }

    #[test]
    fn rejects_zero_dimension() {
        let result = GridGeometry::new([0, 3, 2], Vector3::new(1.0, 1.0, 1.0), Point3::origin());
        assert!(matches!(result, Err(GridError::ZeroDimension { axis: 0 })));
    }

    #[test]
    fn rejects_non_positive_spacing() {
        let result = GridGeometry::new([2, 2, 2], Vector3::new(1.0, -1.0, 1.0), Point3::origin());
        assert!(matches!(
            result,
            Err(GridError::NonPositiveSpacing { axis: 1, .. })
        ));
    }

    #[test]
    fn linear_index_round_trips_through_voxel_coords() {
        let g = geometry();
        for index in 0..g.voxel_count() {
            let (i, j, k) = g.voxel_coords(index);
            assert_eq!(g.linear_index(i, j, k), index);
        }
    }

    #[test]
    fn voxel_center_is_inside_aabb() {
        let g = geometry();
        let c = g.voxel_center(0, 0, 0);
        assert!(g.contains_point(&c));
        assert_eq!(c, Point3::new(-3.0, -2.0, -1.0));
    }

    #[test]
    fn trilinear_sample_reproduces_voxel_values_at_centers() {
        let g = geometry();
        let values: Vec<f64> = (0..g.voxel_count()).map(|i| i as f64).collect();
        for index in 0..g.voxel_count() {
            let (i, j, k) = g.voxel_coords(index);
            let sampled = g.sample_trilinear(&values, &g.voxel_center(i, j, k)).unwrap();
            assert!((sampled - index as f64).abs() < 1e-12);
        }
    }

    #[test]
    fn trilinear_sample_is_none_outside_grid() {
        let g = geometry();
        let values = vec![1.0; g.voxel_count()];
        assert!(g.sample_trilinear(&values, &Point3::new(100.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn with_spacing_preserves_extent() {
        let g = geometry();
        let fine = g.with_spacing(Vector3::new(1.0, 1.0, 1.0)).unwrap();
        assert_eq!(fine.dims(), [8, 6, 4]);
        assert_eq!(fine.aabb(), g.aabb());
    }
}
