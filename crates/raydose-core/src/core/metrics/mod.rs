//! Dose-volume metrics: DVH curves and scalar dose queries over structures.

pub mod dvh;

use thiserror::Error;

use crate::core::models::dose::DoseGrid;
use crate::core::models::grid::GridError;
use crate::core::models::structure::Structure;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Structure '{0}' has no voxels in the current volume")]
    EmptyStructure(String),

    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Dose samples (Gy) of all voxels inside a structure.
///
/// Fails with `EmptyStructure` when the mask selects no voxels, and with a
/// geometry error when the structure was defined on a different grid.
pub fn structure_samples(dose: &DoseGrid, structure: &Structure) -> Result<Vec<f64>, MetricsError> {
    dose.geometry().check_same(structure.geometry())?;
    let values = dose.values();
    let samples: Vec<f64> = structure.voxel_indices().map(|i| values[i]).collect();
    if samples.is_empty() {
        return Err(MetricsError::EmptyStructure(structure.name().to_string()));
    }
    Ok(samples)
}
