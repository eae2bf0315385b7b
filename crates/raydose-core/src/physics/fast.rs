//! Fast approximate dose: the pencil-beam model evaluated on a coarsened
//! grid and resampled back. Intended for the optimizer's inner loop, where
//! thousands of evaluations trade accuracy for latency.

use super::{pencil_beam, PhysicsOptions};
use crate::core::models::beam::Beam;
use crate::core::models::dose::DoseGrid;
use crate::core::models::volume::Volume;
use crate::engine::cancel::CancelToken;
use crate::engine::error::EngineError;

pub(crate) fn compute(
    volume: &Volume,
    beam: &Beam,
    options: &PhysicsOptions,
    cancel: &CancelToken,
) -> Result<DoseGrid, EngineError> {
    let factor = options.coarsen_factor.max(1) as f64;
    if factor <= 1.0 {
        return pencil_beam::compute(volume, beam, options, cancel);
    }
    let fine = volume.geometry().clone();
    let coarse = fine.with_spacing(fine.spacing() * factor)?;
    let coarse_volume = volume.resample_onto(&coarse);

    // A coarser march is enough at a coarser resolution.
    let coarse_options = PhysicsOptions {
        step_mm: options.step_mm * factor,
        ..options.clone()
    };
    let coarse_dose = pencil_beam::compute(&coarse_volume, beam, &coarse_options, cancel)?;
    Ok(coarse_dose.resample_onto(&fine))
}
