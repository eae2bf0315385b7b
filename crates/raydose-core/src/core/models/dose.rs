use nalgebra::Point3;

use super::grid::{GridError, GridGeometry};

/// Absorbed dose per voxel (Gy), co-registered with a volume's grid.
///
/// Dose is strictly additive: the grid for a beam set equals the voxel-wise
/// sum of per-beam grids computed independently. `accumulate` enforces
/// geometry identity so grids from different frames can never be mixed.
#[derive(Debug, Clone, PartialEq)]
pub struct DoseGrid {
    geometry: GridGeometry,
    values: Vec<f64>,
}

impl DoseGrid {
    pub fn zeros(geometry: GridGeometry) -> Self {
        let n = geometry.voxel_count();
        Self {
            geometry,
            values: vec![0.0; n],
        }
    }

    pub fn from_values(geometry: GridGeometry, values: Vec<f64>) -> Result<Self, GridError> {
        if values.len() != geometry.voxel_count() {
            return Err(GridError::GeometryMismatch {
                left: geometry.dims(),
                right: [values.len(), 0, 0],
            });
        }
        Ok(Self { geometry, values })
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.values[self.geometry.linear_index(i, j, k)]
    }

    #[inline]
    pub fn add(&mut self, i: usize, j: usize, k: usize, dose_gy: f64) {
        self.values[self.geometry.linear_index(i, j, k)] += dose_gy;
    }

    /// Voxel-wise sum with another grid on the identical geometry.
    pub fn accumulate(&mut self, other: &DoseGrid) -> Result<(), GridError> {
        self.geometry.check_same(&other.geometry)?;
        for (a, b) in self.values.iter_mut().zip(other.values.iter()) {
            *a += b;
        }
        Ok(())
    }

    pub fn scale(&mut self, factor: f64) {
        for v in &mut self.values {
            *v *= factor;
        }
    }

    pub fn max_dose(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }

    /// Trilinear dose at a world point; zero outside the grid.
    pub fn dose_at(&self, p: &Point3<f64>) -> f64 {
        self.geometry
            .sample_trilinear(&self.values, p)
            .unwrap_or(0.0)
    }

    /// Resample onto another geometry with the same trilinear scheme used for
    /// density input; identity when geometries match.
    pub fn resample_onto(&self, target: &GridGeometry) -> DoseGrid {
        if *target == self.geometry {
            return self.clone();
        }
        let dims = target.dims();
        let mut out = DoseGrid::zeros(target.clone());
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    let p = target.voxel_center(i, j, k);
                    out.values[target.linear_index(i, j, k)] = self.dose_at(&p);
                }
            }
        }
        out
    }
}
