//! Seeded Metropolis search over aperture shapes.
//!
//! Each move nudges one leaf edge of one beam by a bixel, rebuilds the
//! beam's fluence from its control points, and recomputes only that beam's
//! structure samples. Acceptance follows the Metropolis criterion with a
//! geometric cooling schedule; the random stream comes from a `StdRng`
//! seeded from config, so identical inputs reproduce identical plans.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::search_cost;
use crate::core::clinical::constraint::Constraint;
use crate::core::clinical::objective::Objective;
use crate::core::clinical::score::CostBreakdown;
use crate::core::machine::MachineModel;
use crate::core::metrics::structure_samples;
use crate::core::models::beam::{Beam, FluenceMap};
use crate::core::models::ids::{BeamId, StructureId};
use crate::core::models::plan::Plan;
use crate::core::models::structure::StructureSet;
use crate::core::models::volume::Volume;
use crate::engine::cancel::CancelToken;
use crate::engine::config::OptimizationConfig;
use crate::engine::error::EngineError;
use crate::engine::influence::goal_structures;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::physics;

pub(crate) struct AnnealingParams {
    pub seed: u64,
    pub initial_temperature: f64,
    pub cooling_rate: f64,
    pub moves_per_iteration: usize,
}

pub(crate) struct AnnealingResult {
    pub plan: Plan,
    pub history: Vec<f64>,
    pub converged: bool,
    pub iterations: usize,
    pub breakdown: CostBreakdown,
}

/// Structure samples of one beam's dose at its current aperture.
fn beam_samples(
    volume: &Volume,
    beam: &Beam,
    structures: &StructureSet,
    structure_ids: &[StructureId],
    config: &OptimizationConfig,
    cancel: &CancelToken,
) -> Result<Vec<Vec<f64>>, EngineError> {
    let dose = physics::compute_beam_dose(
        volume,
        beam,
        config.dose.algorithm,
        &config.dose.physics,
        cancel,
    )?;
    structure_ids
        .iter()
        .map(|&id| {
            let structure = structures.get(id).ok_or_else(|| {
                EngineError::Internal("goal references an unknown structure".to_string())
            })?;
            structure_samples(&dose, structure).map_err(EngineError::from)
        })
        .collect()
}

fn breakdown_from(
    per_beam: &[Vec<Vec<f64>>],
    structure_ids: &[StructureId],
    objectives: &[Objective],
    constraints: &[Constraint],
) -> Result<CostBreakdown, EngineError> {
    let combined: Vec<Vec<f64>> = (0..structure_ids.len())
        .map(|s| {
            let n = per_beam.first().map(|b| b[s].len()).unwrap_or(0);
            let mut sum = vec![0.0; n];
            for beam in per_beam {
                for (acc, &v) in sum.iter_mut().zip(&beam[s]) {
                    *acc += v;
                }
            }
            sum
        })
        .collect();
    let samples_of = |id: StructureId| -> Result<&[f64], EngineError> {
        let index = structure_ids.iter().position(|&s| s == id).ok_or_else(|| {
            EngineError::Internal("goal references a structure outside the model".to_string())
        })?;
        Ok(&combined[index])
    };

    let mut objective_cost = 0.0;
    for objective in objectives {
        objective_cost += objective.penalty(samples_of(objective.structure)?)?;
    }
    let mut constraint_violations = Vec::with_capacity(constraints.len());
    for constraint in constraints {
        constraint_violations.push(constraint.violation(samples_of(constraint.structure)?)?);
    }
    Ok(CostBreakdown {
        objective_cost,
        constraint_violations,
    })
}

/// Applies a new aperture to a beam: replaces its single control point's leaf
/// pairs and rebuilds the (relative) fluence from the aperture.
fn apply_aperture(beam: &mut Beam, leaf_index: usize, left: f64, right: f64) -> Result<(), EngineError> {
    let mut points = beam.control_points().to_vec();
    for cp in &mut points {
        cp.leaf_pairs[leaf_index].left = left;
        cp.leaf_pairs[leaf_index].right = right;
    }
    beam.set_control_points(points)?;
    let (nx, ny) = beam.fluence.dims();
    let bixel = beam.fluence.bixel_mm();
    let meterset = beam.meterset_mu();
    let mut fluence = FluenceMap::from_control_points(nx, ny, bixel, beam.control_points())?;
    if meterset > 0.0 {
        fluence.scale(1.0 / meterset);
    }
    beam.fluence = fluence;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn run(
    volume: &Volume,
    plan: &Plan,
    structures: &StructureSet,
    objectives: &[Objective],
    constraints: &[Constraint],
    machine: &MachineModel,
    config: &OptimizationConfig,
    params: &AnnealingParams,
    reporter: &ProgressReporter,
    cancel: &CancelToken,
) -> Result<AnnealingResult, EngineError> {
    let structure_ids = goal_structures(objectives, constraints);
    let beam_ids: Vec<BeamId> = plan.beam_ids().to_vec();
    let mut working = plan.clone();

    let mut per_beam: Vec<Vec<Vec<f64>>> = Vec::with_capacity(beam_ids.len());
    for &id in &beam_ids {
        let beam = working
            .beam(id)
            .ok_or_else(|| EngineError::Internal("beam vanished from plan".to_string()))?;
        per_beam.push(beam_samples(
            volume,
            beam,
            structures,
            &structure_ids,
            config,
            cancel,
        )?);
    }
    let mut current = search_cost(&breakdown_from(
        &per_beam,
        &structure_ids,
        objectives,
        constraints,
    )?);

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut temperature = params.initial_temperature;
    let mut history = Vec::with_capacity(config.max_iterations);
    let mut best_plan = working.clone();
    let mut best_samples = per_beam.clone();
    let mut best_cost = current;
    let mut stalled = 0;
    let mut converged = false;
    let mut iterations = 0;
    let half_field = machine.max_field_mm / 2.0;

    for iteration in 0..config.max_iterations {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        iterations = iteration + 1;
        let iteration_start = current;

        for _ in 0..params.moves_per_iteration.max(1) {
            let b = rng.gen_range(0..beam_ids.len());
            let id = beam_ids[b];
            let saved_beam = working
                .beam(id)
                .ok_or_else(|| EngineError::Internal("beam vanished from plan".to_string()))?
                .clone();
            let pair_count = saved_beam.control_points()[0].leaf_pairs.len();
            let j = rng.gen_range(0..pair_count);
            let pair = saved_beam.control_points()[0].leaf_pairs[j];
            let delta = if rng.gen_bool(0.5) {
                saved_beam.fluence.bixel_mm()
            } else {
                -saved_beam.fluence.bixel_mm()
            };
            let (mut left, mut right) = (pair.left, pair.right);
            if rng.gen_bool(0.5) {
                left = (left + delta).clamp(-half_field, right);
            } else {
                right = (right + delta).clamp(left, half_field);
            }

            apply_aperture(working.beam_mut(id)?, j, left, right)?;
            let candidate_samples = beam_samples(
                volume,
                working.beam(id).ok_or_else(|| {
                    EngineError::Internal("beam vanished from plan".to_string())
                })?,
                structures,
                &structure_ids,
                config,
                cancel,
            )?;
            let saved_samples = std::mem::replace(&mut per_beam[b], candidate_samples);
            let candidate = search_cost(&breakdown_from(
                &per_beam,
                &structure_ids,
                objectives,
                constraints,
            )?);

            let delta_cost = candidate - current;
            let accept = delta_cost <= 0.0
                || (temperature > 0.0 && rng.gen::<f64>() < (-delta_cost / temperature).exp());
            if accept {
                current = candidate;
                if current < best_cost {
                    best_cost = current;
                    best_plan = working.clone();
                    best_samples = per_beam.clone();
                }
            } else {
                *working.beam_mut(id)? = saved_beam;
                per_beam[b] = saved_samples;
            }
        }

        temperature *= params.cooling_rate;
        history.push(current);
        reporter.report(Progress::IterationUpdate {
            iteration,
            cost: current,
        });

        let improvement = (iteration_start - current) / iteration_start.abs().max(1e-12);
        if improvement < config.convergence.tolerance {
            stalled += 1;
            if stalled >= config.convergence.patience {
                converged = true;
                break;
            }
        } else {
            stalled = 0;
        }
    }

    debug!(best_cost, iterations, converged, "annealing done");
    let breakdown = breakdown_from(&best_samples, &structure_ids, objectives, constraints)?;
    Ok(AnnealingResult {
        plan: best_plan,
        history,
        converged,
        iterations,
        breakdown,
    })
}
