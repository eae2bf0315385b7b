//! Full-plan dose computation: validation, per-beam dispatch to the physics
//! strategy set, and accumulation onto the patient grid.

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, instrument};

use nalgebra::Vector3;

use super::cancel::CancelToken;
use super::config::DoseConfig;
use super::error::EngineError;
use super::progress::{Progress, ProgressReporter};
use crate::core::machine::MachineModel;
use crate::core::models::beam::Beam;
use crate::core::models::dose::DoseGrid;
use crate::core::models::plan::Plan;
use crate::core::models::volume::Volume;
use crate::physics::{self, raytrace};

/// Validates that every beam's central axis actually traverses the volume.
pub(crate) fn check_beam_geometry(volume: &Volume, beams: &[&Beam]) -> Result<(), EngineError> {
    for (beam_index, beam) in beams.iter().enumerate() {
        let source = beam.source_position();
        let axis = beam.axis();
        let hit = raytrace::clip_ray(volume.geometry(), &source, &axis)
            .map(|(t0, t1)| t1 > t0.max(0.0))
            .unwrap_or(false);
        if !hit {
            return Err(EngineError::InvalidGeometry { beam_index });
        }
    }
    Ok(())
}

/// Computes the total plan dose on the volume's grid.
///
/// The per-beam doses are computed independently (in parallel when the
/// `parallel` feature is active) on the calculation grid and summed; the
/// result is resampled back onto the volume's grid. The sum is exactly the
/// voxel-wise sum of single-beam computations with the same config.
#[instrument(skip_all, fields(beams = plan.beam_count(), algorithm = config.algorithm.label()))]
pub fn compute_dose(
    volume: &Volume,
    plan: &Plan,
    machine: &MachineModel,
    config: &DoseConfig,
    reporter: &ProgressReporter,
    cancel: &CancelToken,
) -> Result<DoseGrid, EngineError> {
    if !machine.supports_algorithm(config.algorithm) {
        return Err(EngineError::UnsupportedAlgorithm {
            algorithm: config.algorithm,
            machine: machine.name.clone(),
        });
    }
    let beams: Vec<&Beam> = plan.beams_ordered().map(|(_, b)| b).collect();
    for beam in &beams {
        if !machine.supports_energy(beam.energy) {
            return Err(EngineError::EnergyNotCommissioned {
                energy: beam.energy,
                machine: machine.name.clone(),
            });
        }
    }
    check_beam_geometry(volume, &beams)?;

    let patient_geometry = volume.geometry().clone();
    let calc_geometry = match config.grid_spacing_mm {
        Some(s) => patient_geometry.with_spacing(Vector3::new(s, s, s))?,
        None => patient_geometry.clone(),
    };
    let calc_volume = volume.resample_onto(&calc_geometry);
    debug!(calc_dims = ?calc_geometry.dims(), "dose grid prepared");

    reporter.report(Progress::TaskStart {
        total_steps: beams.len() as u64,
    });
    let compute_one = |beam: &&Beam| -> Result<DoseGrid, EngineError> {
        let dose = physics::compute_beam_dose(
            &calc_volume,
            beam,
            config.algorithm,
            &config.physics,
            cancel,
        )?;
        reporter.report(Progress::TaskIncrement);
        Ok(dose)
    };

    #[cfg(feature = "parallel")]
    let per_beam: Vec<DoseGrid> = beams.par_iter().map(compute_one).collect::<Result<_, _>>()?;
    #[cfg(not(feature = "parallel"))]
    let per_beam: Vec<DoseGrid> = beams.iter().map(compute_one).collect::<Result<_, _>>()?;

    let mut total = DoseGrid::zeros(calc_geometry);
    for dose in &per_beam {
        total.accumulate(dose)?;
    }
    reporter.report(Progress::TaskFinish);

    // A handful of non-finite voxels is repaired; more is a diverged solve.
    let voxels = total.values().len();
    let divergent = total.values().iter().filter(|v| !v.is_finite()).count();
    let fraction = divergent as f64 / voxels as f64;
    if fraction > config.max_divergent_fraction {
        return Err(EngineError::NumericalDivergence {
            fraction,
            limit: config.max_divergent_fraction,
        });
    }
    if divergent > 0 {
        debug!(divergent, "clamping non-finite dose voxels to zero");
        for v in total.values_mut() {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
    }

    Ok(total.resample_onto(&patient_geometry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::beam::{EnergyClass, FluenceMap};
    use crate::core::models::grid::GridGeometry;
    use crate::physics::DoseAlgorithm;
    use nalgebra::Point3;

    fn machine() -> MachineModel {
        MachineModel {
            name: "TrueLine-6".to_string(),
            energies: vec![EnergyClass::Mv6, EnergyClass::Mv10],
            max_field_mm: 400.0,
            leaf_width_mm: 5.0,
            leaf_pairs: 60,
            max_leaf_speed_mm_s: 25.0,
            dose_rate_mu_min: 600.0,
            max_segments: 50,
            min_segment_area_mm2: 100.0,
            commissioned: vec![DoseAlgorithm::PencilBeam, DoseAlgorithm::FastApproximate],
        }
    }

    fn phantom() -> Volume {
        let g = GridGeometry::new(
            [12, 12, 12],
            Vector3::new(5.0, 5.0, 5.0),
            Point3::new(-30.0, -30.0, -30.0),
        )
        .unwrap();
        Volume::uniform(g, 1.0).unwrap()
    }

    fn beam(gantry_deg: f64, energy: EnergyClass) -> Beam {
        Beam::new(
            energy,
            1000.0,
            Point3::origin(),
            gantry_deg,
            0.0,
            FluenceMap::uniform(8, 8, 5.0, 1.0).unwrap(),
            100.0,
        )
        .unwrap()
    }

    fn config(algorithm: DoseAlgorithm) -> DoseConfig {
        DoseConfig {
            algorithm,
            grid_spacing_mm: None,
            physics: Default::default(),
            max_divergent_fraction: 1e-3,
        }
    }

    #[test]
    fn uncommissioned_algorithm_is_rejected() {
        let mut plan = Plan::new();
        plan.add_beam(beam(0.0, EnergyClass::Mv6)).unwrap();
        let result = compute_dose(
            &phantom(),
            &plan,
            &machine(),
            &config(DoseAlgorithm::GridBoltzmann),
            &ProgressReporter::new(),
            &CancelToken::new(),
        );
        assert!(matches!(
            result,
            Err(EngineError::UnsupportedAlgorithm { .. })
        ));
    }

    #[test]
    fn uncommissioned_energy_is_rejected() {
        let mut plan = Plan::new();
        plan.add_beam(beam(0.0, EnergyClass::Mv15)).unwrap();
        let result = compute_dose(
            &phantom(),
            &plan,
            &machine(),
            &config(DoseAlgorithm::PencilBeam),
            &ProgressReporter::new(),
            &CancelToken::new(),
        );
        assert!(matches!(
            result,
            Err(EngineError::EnergyNotCommissioned { .. })
        ));
    }

    #[test]
    fn beam_missing_the_volume_is_invalid_geometry() {
        let mut plan = Plan::new();
        let mut wild = beam(0.0, EnergyClass::Mv6);
        wild.isocenter = Point3::new(100_000.0, 0.0, 0.0);
        plan.add_beam(wild).unwrap();
        let result = compute_dose(
            &phantom(),
            &plan,
            &machine(),
            &config(DoseAlgorithm::PencilBeam),
            &ProgressReporter::new(),
            &CancelToken::new(),
        );
        assert!(matches!(
            result,
            Err(EngineError::InvalidGeometry { beam_index: 0 })
        ));
    }

    #[test]
    fn plan_dose_is_the_sum_of_per_beam_doses() {
        let volume = phantom();
        let m = machine();
        let c = config(DoseAlgorithm::PencilBeam);
        let reporter = ProgressReporter::new();
        let token = CancelToken::new();

        let mut lateral_plan = Plan::new();
        lateral_plan.add_beam(beam(90.0, EnergyClass::Mv6)).unwrap();
        let mut anterior_plan = Plan::new();
        anterior_plan.add_beam(beam(0.0, EnergyClass::Mv6)).unwrap();
        let mut both = Plan::new();
        both.add_beam(beam(90.0, EnergyClass::Mv6)).unwrap();
        both.add_beam(beam(0.0, EnergyClass::Mv6)).unwrap();

        let d_lat = compute_dose(&volume, &lateral_plan, &m, &c, &reporter, &token).unwrap();
        let d_ant = compute_dose(&volume, &anterior_plan, &m, &c, &reporter, &token).unwrap();
        let d_both = compute_dose(&volume, &both, &m, &c, &reporter, &token).unwrap();

        for (index, &v) in d_both.values().iter().enumerate() {
            let expected = d_lat.values()[index] + d_ant.values()[index];
            assert!((v - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn coarse_calculation_grid_resamples_to_the_patient_grid() {
        let volume = phantom();
        let mut plan = Plan::new();
        plan.add_beam(beam(0.0, EnergyClass::Mv6)).unwrap();
        let c = DoseConfig {
            grid_spacing_mm: Some(10.0),
            ..config(DoseAlgorithm::PencilBeam)
        };
        let dose = compute_dose(
            &volume,
            &plan,
            &machine(),
            &c,
            &ProgressReporter::new(),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(dose.geometry(), volume.geometry());
        assert!(dose.max_dose() > 0.0);
    }

    #[test]
    fn progress_reports_one_increment_per_beam() {
        use std::sync::atomic::{AtomicU64, Ordering};
        let increments = AtomicU64::new(0);
        let reporter = ProgressReporter::with_callback(Box::new(|event| {
            if matches!(event, Progress::TaskIncrement) {
                increments.fetch_add(1, Ordering::Relaxed);
            }
        }));
        let mut plan = Plan::new();
        plan.add_beam(beam(0.0, EnergyClass::Mv6)).unwrap();
        plan.add_beam(beam(180.0, EnergyClass::Mv6)).unwrap();
        compute_dose(
            &phantom(),
            &plan,
            &machine(),
            &config(DoseAlgorithm::PencilBeam),
            &reporter,
            &CancelToken::new(),
        )
        .unwrap();
        drop(reporter);
        assert_eq!(increments.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn cancellation_surfaces_from_the_physics_layer() {
        let mut plan = Plan::new();
        plan.add_beam(beam(0.0, EnergyClass::Mv6)).unwrap();
        let token = CancelToken::new();
        token.cancel();
        let result = compute_dose(
            &phantom(),
            &plan,
            &machine(),
            &config(DoseAlgorithm::PencilBeam),
            &ProgressReporter::new(),
            &token,
        );
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
