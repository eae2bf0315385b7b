//! Collapsed-cone convolution/superposition.
//!
//! The primary electron component is modeled analytically (identical to the
//! pencil-beam depth-dose) and scaled by `1 - scatter_ratio`; the scatter
//! component transports the TERMA released in each voxel along a fixed
//! lattice of cone directions with an exponential deposition kernel, scaled
//! by `scatter_ratio`. Heterogeneity enters the scatter term through the
//! density already folded into TERMA; the primary term carries the Batho
//! correction through the pencil computation.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::kernels::{BeamKernel, GY_PER_MU};
use super::raytrace::{radiological_depth, BeamFrame};
use super::{direction_lattice, pencil_beam, PhysicsOptions};
use crate::core::models::beam::Beam;
use crate::core::models::dose::DoseGrid;
use crate::core::models::volume::Volume;
use crate::engine::cancel::CancelToken;
use crate::engine::error::EngineError;

/// Total energy released per unit mass, per voxel: primary fluence attenuated
/// to the voxel's radiological depth, times the inverse-square factor and the
/// local density. Shared source term of the cone and ordinate transports.
pub(crate) fn terma_grid(
    volume: &Volume,
    beam: &Beam,
    options: &PhysicsOptions,
    cancel: &CancelToken,
) -> Result<DoseGrid, EngineError> {
    let kernel = BeamKernel::for_energy(beam.energy);
    let frame = BeamFrame::new(beam);
    let geometry = volume.geometry().clone();
    let dims = geometry.dims();
    let meterset = beam.meterset_mu();
    let mut terma = DoseGrid::zeros(geometry.clone());

    for k in 0..dims[2] {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        for j in 0..dims[1] {
            for i in 0..dims[0] {
                let density = volume.density(i, j, k);
                if density <= 0.0 {
                    continue;
                }
                let p = geometry.voxel_center(i, j, k);
                let Some(coords) = frame.project(&p) else {
                    continue;
                };
                let fluence = beam.fluence.value_at(coords.x_mm, coords.y_mm);
                if fluence <= 0.0 {
                    continue;
                }
                let depth = radiological_depth(volume, &frame.source, &p, options.step_mm);
                let attenuation = (-kernel.mu_mm * depth).exp();
                terma.add(
                    i,
                    j,
                    k,
                    fluence * attenuation * coords.inverse_square * density * meterset * GY_PER_MU,
                );
            }
        }
    }

    Ok(terma)
}

pub(crate) fn compute(
    volume: &Volume,
    beam: &Beam,
    options: &PhysicsOptions,
    cancel: &CancelToken,
) -> Result<DoseGrid, EngineError> {
    let kernel = BeamKernel::for_energy(beam.energy);
    let geometry = volume.geometry().clone();
    let dims = geometry.dims();
    let spacing = geometry.spacing();

    let mut primary = pencil_beam::compute(volume, beam, options, cancel)?;
    primary.scale(1.0 - options.scatter_ratio);

    let terma = terma_grid(volume, beam, options, cancel)?;
    let directions = direction_lattice(options.cone_directions);
    // Mean deposition range of the scattered component; the exponential
    // kernel is normalized so the gather conserves the released energy.
    let range_mm = 3.0 * kernel.sigma_mm;
    let reach_mm = 4.0 * range_mm;

    let gather_slice = |k: usize| -> Result<Vec<f64>, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let mut slice = vec![0.0; dims[0] * dims[1]];
        for j in 0..dims[1] {
            for i in 0..dims[0] {
                if volume.density(i, j, k) <= 0.0 {
                    continue;
                }
                let p = geometry.voxel_center(i, j, k);
                let mut collected = 0.0;
                for d in &directions {
                    let step = nalgebra::Vector3::new(
                        d[0] as f64 * spacing.x,
                        d[1] as f64 * spacing.y,
                        d[2] as f64 * spacing.z,
                    );
                    let step_len = step.norm();
                    let mut t = 0.0;
                    let mut q = p;
                    while t <= reach_mm {
                        collected += terma.dose_at(&q) * (-t / range_mm).exp() * step_len;
                        t += step_len;
                        q += step;
                        if !geometry.contains_point(&q) {
                            break;
                        }
                    }
                }
                slice[j * dims[0] + i] =
                    collected * options.scatter_ratio / (directions.len() as f64 * range_mm);
            }
        }
        Ok(slice)
    };

    #[cfg(feature = "parallel")]
    let slices: Vec<Vec<f64>> = (0..dims[2])
        .into_par_iter()
        .map(gather_slice)
        .collect::<Result<_, _>>()?;
    #[cfg(not(feature = "parallel"))]
    let slices: Vec<Vec<f64>> = (0..dims[2]).map(gather_slice).collect::<Result<_, _>>()?;

    let mut dose = primary;
    for (k, slice) in slices.iter().enumerate() {
        for j in 0..dims[1] {
            for i in 0..dims[0] {
                dose.add(i, j, k, slice[j * dims[0] + i]);
            }
        }
    }

    Ok(dose)
}
