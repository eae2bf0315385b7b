use nalgebra::Point3;

use super::ModelError;
use super::grid::GridGeometry;
use crate::core::machine::CalibrationCurve;

/// Patient density volume: relative electron density per voxel on a fixed grid.
///
/// Densities are validated at construction to be finite and non-negative;
/// the grid geometry is immutable for the lifetime of the volume.
#[derive(Debug, Clone)]
pub struct Volume {
    geometry: GridGeometry,
    densities: Vec<f64>,
}

impl Volume {
    pub fn new(geometry: GridGeometry, densities: Vec<f64>) -> Result<Self, ModelError> {
        if densities.len() != geometry.voxel_count() {
            return Err(ModelError::LengthMismatch {
                expected: geometry.voxel_count(),
                actual: densities.len(),
            });
        }
        for (index, &value) in densities.iter().enumerate() {
            if !value.is_finite() || value < 0.0 {
                return Err(ModelError::InvalidDensity { index, value });
            }
        }
        Ok(Self {
            geometry,
            densities,
        })
    }

    /// Uniform phantom of the given density.
    pub fn uniform(geometry: GridGeometry, density: f64) -> Result<Self, ModelError> {
        let n = geometry.voxel_count();
        Self::new(geometry, vec![density; n])
    }

    /// Map raw Hounsfield units through a calibration curve into relative
    /// electron densities.
    pub fn from_hounsfield(
        geometry: GridGeometry,
        hounsfield: &[f64],
        curve: &CalibrationCurve,
    ) -> Result<Self, ModelError> {
        if hounsfield.len() != geometry.voxel_count() {
            return Err(ModelError::LengthMismatch {
                expected: geometry.voxel_count(),
                actual: hounsfield.len(),
            });
        }
        let densities = hounsfield.iter().map(|&hu| curve.density_for(hu)).collect();
        Self::new(geometry, densities)
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn densities(&self) -> &[f64] {
        &self.densities
    }

    #[inline]
    pub fn density(&self, i: usize, j: usize, k: usize) -> f64 {
        self.densities[self.geometry.linear_index(i, j, k)]
    }

    /// Trilinear density at a world point; zero outside the volume.
    #[inline]
    pub fn density_at(&self, p: &Point3<f64>) -> f64 {
        self.geometry
            .sample_trilinear(&self.densities, p)
            .unwrap_or(0.0)
    }

    /// Resample onto another geometry with trilinear interpolation.
    ///
    /// Voxels of the target outside this volume's extent receive zero
    /// density. Resampling onto an identical geometry is the identity.
    pub fn resample_onto(&self, target: &GridGeometry) -> Volume {
        if *target == self.geometry {
            return self.clone();
        }
        let dims = target.dims();
        let mut densities = vec![0.0; target.voxel_count()];
        for k in 0..dims[2] {
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    let p = target.voxel_center(i, j, k);
                    densities[target.linear_index(i, j, k)] = self.density_at(&p);
                }
            }
        }
        Volume {
            geometry: target.clone(),
            densities,
        }
    }
}
