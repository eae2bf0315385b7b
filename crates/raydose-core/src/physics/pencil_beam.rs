//! Pencil-beam convolution: the beam is decomposed into narrow pencils, and
//! the dose at each voxel is the fluence at the voxel's pencil times the
//! 1-D depth-dose kernel at its radiological depth. Lateral heterogeneity
//! gradients are ignored by construction.

use super::heterogeneity::batho_correction;
use super::kernels::{BeamKernel, GY_PER_MU};
use super::raytrace::{BeamFrame, radiological_depth};
use super::PhysicsOptions;
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
    let kernel = BeamKernel::for_energy(beam.energy);
    let frame = BeamFrame::new(beam);
    let geometry = volume.geometry().clone();
    let dims = geometry.dims();
    let meterset = beam.meterset_mu();
    let mut dose = DoseGrid::zeros(geometry.clone());

    for k in 0..dims[2] {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        for j in 0..dims[1] {
            for i in 0..dims[0] {
                let local_density = volume.density(i, j, k);
                if local_density <= 0.0 {
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
                let correction = batho_correction(local_density, kernel.batho_exponent);
                dose.add(
                    i,
                    j,
                    k,
                    fluence
                        * kernel.depth_dose(depth)
                        * coords.inverse_square
                        * correction
                        * meterset
                        * GY_PER_MU,
                );
            }
        }
    }

    Ok(dose)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::beam::{EnergyClass, FluenceMap};
    use crate::core::models::grid::GridGeometry;
    use nalgebra::{Point3, Vector3};

    fn water_phantom(spacing_mm: f64, extent_mm: f64) -> Volume {
        let n = (extent_mm / spacing_mm) as usize;
        let half = extent_mm / 2.0;
        let g = GridGeometry::new(
            [n, n, n],
            Vector3::new(spacing_mm, spacing_mm, spacing_mm),
            Point3::new(-half, -half, -half),
        )
        .unwrap();
        Volume::uniform(g, 1.0).unwrap()
    }

    fn normal_beam(mu: f64) -> Beam {
        Beam::new(
            EnergyClass::Mv6,
            1000.0,
            Point3::origin(),
            0.0,
            0.0,
            FluenceMap::uniform(20, 20, 5.0, 1.0).unwrap(),
            mu,
        )
        .unwrap()
    }

    /// The canonical commissioning scenario: a 10 cm water cube, a 6 MV beam
    /// of 100 MU at normal incidence. The dose maximum along the central axis
    /// must fall at the 6 MV buildup depth.
    #[test]
    fn peak_dose_is_at_buildup_depth_in_water() {
        let volume = water_phantom(2.0, 100.0);
        let dose = compute(
            &volume,
            &normal_beam(100.0),
            &PhysicsOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();

        // Scan the central axis (beam travels along -y; entry face at y=+50).
        let g = volume.geometry().clone();
        let dims = g.dims();
        let (ci, ck) = (dims[0] / 2, dims[2] / 2);
        let mut best = (0usize, 0.0f64);
        for j in 0..dims[1] {
            let d = dose.get(ci, j, ck);
            if d > best.1 {
                best = (j, d);
            }
        }
        let peak_center = g.voxel_center(ci, best.0, ck);
        let depth_of_peak = 50.0 - peak_center.y;
        let dmax = BeamKernel::for_energy(EnergyClass::Mv6).dmax_mm();
        assert!(
            (depth_of_peak - dmax).abs() <= 3.0,
            "peak at {depth_of_peak} mm, expected {dmax} mm"
        );
    }

    #[test]
    fn dose_scales_linearly_with_meterset() {
        let volume = water_phantom(5.0, 60.0);
        let options = PhysicsOptions::default();
        let token = CancelToken::new();
        let d100 = compute(&volume, &normal_beam(100.0), &options, &token).unwrap();
        let d200 = compute(&volume, &normal_beam(200.0), &options, &token).unwrap();
        let max100 = d100.max_dose();
        let max200 = d200.max_dose();
        assert!(max100 > 0.0);
        assert!((max200 / max100 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn no_dose_outside_the_field() {
        let volume = water_phantom(5.0, 100.0);
        let mut beam = normal_beam(100.0);
        // Narrow 10x10 mm field.
        beam.fluence = FluenceMap::uniform(2, 2, 5.0, 1.0).unwrap();
        let dose = compute(
            &volume,
            &beam,
            &PhysicsOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();
        // A corner voxel far off-axis receives nothing.
        assert_eq!(dose.get(0, 10, 0), 0.0);
        assert!(dose.max_dose() > 0.0);
    }

    #[test]
    fn cancellation_aborts_computation() {
        let volume = water_phantom(5.0, 60.0);
        let token = CancelToken::new();
        token.cancel();
        let result = compute(
            &volume,
            &normal_beam(100.0),
            &PhysicsOptions::default(),
            &token,
        );
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
