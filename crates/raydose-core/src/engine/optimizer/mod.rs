//! Iterative plan optimization.
//!
//! Two strategies share one outcome contract: deterministic projected
//! gradient descent on per-beam fluence weights, and a seeded Metropolis
//! search over aperture shapes. Non-convergence and residual constraint
//! violations are advisory flags on the outcome, never errors; an infeasible
//! plan is still returned for inspection.

pub mod annealing;
pub mod gradient;

use tracing::{info, instrument};

use super::cancel::CancelToken;
use super::config::{OptimizationConfig, SearchStrategy};
use super::error::EngineError;
use super::influence::InfluenceModel;
use super::progress::ProgressReporter;
use crate::core::clinical::constraint::Constraint;
use crate::core::clinical::objective::Objective;
use crate::core::clinical::score::CostBreakdown;
use crate::core::machine::MachineModel;
use crate::core::models::plan::Plan;
use crate::core::models::structure::StructureSet;
use crate::core::models::volume::Volume;

/// Result of one optimization run.
///
/// `converged` is false when the iteration budget ran out before the
/// improvement stalled; `feasible` is false when any hard constraint is
/// still violated. Both are advisory.
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub plan: Plan,
    pub converged: bool,
    pub feasible: bool,
    pub best_cost: f64,
    pub iterations: usize,
    pub cost_history: Vec<f64>,
    pub constraint_violations: Vec<f64>,
}

/// The cost the search descends on: the objective cost plus a fixed
/// quadratic push on constraint violations. Reported costs and feasibility
/// always come from the unaugmented breakdown.
pub(crate) fn search_cost(breakdown: &CostBreakdown) -> f64 {
    let violation_penalty: f64 = breakdown
        .constraint_violations
        .iter()
        .map(|&v| v * v)
        .sum();
    breakdown.objective_cost + 100.0 * violation_penalty
}

#[instrument(skip_all, fields(beams = plan.beam_count(), iterations = config.max_iterations))]
#[allow(clippy::too_many_arguments)]
pub fn optimize(
    volume: &Volume,
    plan: &Plan,
    structures: &StructureSet,
    objectives: &[Objective],
    constraints: &[Constraint],
    machine: &MachineModel,
    config: &OptimizationConfig,
    reporter: &ProgressReporter,
    cancel: &CancelToken,
) -> Result<OptimizationOutcome, EngineError> {
    if !machine.supports_algorithm(config.dose.algorithm) {
        return Err(EngineError::UnsupportedAlgorithm {
            algorithm: config.dose.algorithm,
            machine: machine.name.clone(),
        });
    }
    for (_, beam) in plan.beams_ordered() {
        if !machine.supports_energy(beam.energy) {
            return Err(EngineError::EnergyNotCommissioned {
                energy: beam.energy,
                machine: machine.name.clone(),
            });
        }
    }

    let outcome = match &config.strategy {
        SearchStrategy::GradientDescent { step_size } => {
            let model = InfluenceModel::build(
                volume,
                plan,
                structures,
                objectives,
                constraints,
                &config.dose,
                cancel,
            )?;
            let result = gradient::run(
                &model,
                objectives,
                constraints,
                config,
                *step_size,
                reporter,
                cancel,
            )?;

            let mut optimized = plan.clone();
            for (&id, &w) in plan.beam_ids().iter().zip(&result.weights) {
                optimized.beam_mut(id)?.fluence.scale(w);
            }
            optimized.mark_optimized()?;
            OptimizationOutcome {
                plan: optimized,
                converged: result.converged,
                feasible: result.breakdown.is_feasible(),
                best_cost: result.breakdown.objective_cost,
                iterations: result.iterations,
                cost_history: result.history,
                constraint_violations: result.breakdown.constraint_violations,
            }
        }
        SearchStrategy::SimulatedAnnealing {
            seed,
            initial_temperature,
            cooling_rate,
            moves_per_iteration,
        } => {
            let params = annealing::AnnealingParams {
                seed: *seed,
                initial_temperature: *initial_temperature,
                cooling_rate: *cooling_rate,
                moves_per_iteration: *moves_per_iteration,
            };
            let result = annealing::run(
                volume,
                plan,
                structures,
                objectives,
                constraints,
                machine,
                config,
                &params,
                reporter,
                cancel,
            )?;
            let mut optimized = result.plan;
            optimized.mark_optimized()?;
            OptimizationOutcome {
                plan: optimized,
                converged: result.converged,
                feasible: result.breakdown.is_feasible(),
                best_cost: result.breakdown.objective_cost,
                iterations: result.iterations,
                cost_history: result.history,
                constraint_violations: result.breakdown.constraint_violations,
            }
        }
    };

    info!(
        best_cost = outcome.best_cost,
        converged = outcome.converged,
        feasible = outcome.feasible,
        iterations = outcome.iterations,
        "optimization finished"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clinical::constraint::{Bound, DoseMetric};
    use crate::core::clinical::objective::{GoalDirection, ObjectiveKind};
    use crate::core::models::beam::{Beam, EnergyClass, FluenceMap};
    use crate::core::models::grid::GridGeometry;
    use crate::core::models::ids::StructureId;
    use crate::core::models::plan::PlanStatus;
    use crate::core::models::structure::Structure;
    use crate::engine::config::{ConvergenceConfig, DoseConfig};
    use crate::physics::DoseAlgorithm;
    use nalgebra::{Point3, Vector3};

    fn machine() -> MachineModel {
        MachineModel {
            name: "TrueLine-6".to_string(),
            energies: vec![EnergyClass::Mv6],
            max_field_mm: 400.0,
            leaf_width_mm: 5.0,
            leaf_pairs: 60,
            max_leaf_speed_mm_s: 25.0,
            dose_rate_mu_min: 600.0,
            max_segments: 50,
            min_segment_area_mm2: 25.0,
            commissioned: vec![
                DoseAlgorithm::PencilBeam,
                DoseAlgorithm::FastApproximate,
            ],
        }
    }

    fn setup() -> (Volume, Plan, StructureSet, StructureId) {
        let g = GridGeometry::new(
            [10, 10, 10],
            Vector3::new(5.0, 5.0, 5.0),
            Point3::new(-25.0, -25.0, -25.0),
        )
        .unwrap();
        let volume = Volume::uniform(g.clone(), 1.0).unwrap();
        let mut plan = Plan::new();
        for gantry in [0.0, 90.0, 180.0] {
            plan.add_beam(
                Beam::new(
                    EnergyClass::Mv6,
                    1000.0,
                    Point3::origin(),
                    gantry,
                    0.0,
                    FluenceMap::uniform(8, 8, 5.0, 1.0).unwrap(),
                    100.0,
                )
                .unwrap(),
            )
            .unwrap();
        }
        let mut structures = StructureSet::new();
        let id = structures.insert(Structure::sphere("PTV", &g, Point3::origin(), 12.0).unwrap());
        (volume, plan, structures, id)
    }

    fn config(strategy: SearchStrategy) -> OptimizationConfig {
        OptimizationConfig {
            dose: DoseConfig {
                algorithm: DoseAlgorithm::PencilBeam,
                grid_spacing_mm: None,
                physics: Default::default(),
                max_divergent_fraction: 1e-3,
            },
            max_iterations: 40,
            convergence: ConvergenceConfig::default(),
            strategy,
        }
    }

    #[test]
    fn gradient_descent_reaches_a_mean_dose_target() {
        let (volume, plan, structures, id) = setup();
        let objectives = vec![Objective::new(
            id,
            ObjectiveKind::MeanDose {
                limit_gy: 2.0,
                direction: GoalDirection::AtLeast,
            },
            1.0,
        )];
        let outcome = optimize(
            &volume,
            &plan,
            &structures,
            &objectives,
            &[],
            &machine(),
            &config(SearchStrategy::GradientDescent { step_size: 0.5 }),
            &ProgressReporter::new(),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(outcome.plan.status(), PlanStatus::Optimized);
        let first = outcome.cost_history.first().copied().unwrap_or(0.0);
        let last = outcome.cost_history.last().copied().unwrap_or(0.0);
        assert!(last <= first, "cost went up: {first} -> {last}");
    }

    #[test]
    fn infeasible_constraints_are_flagged_not_rejected() {
        let (volume, plan, structures, id) = setup();
        let objectives = vec![Objective::new(
            id,
            ObjectiveKind::MeanDose {
                limit_gy: 5.0,
                direction: GoalDirection::AtLeast,
            },
            1.0,
        )];
        // Impossible pairing: demand mean >= 5 Gy while capping max at 1e-6.
        let constraints = vec![Constraint::new(
            id,
            DoseMetric::MaxDose,
            Bound::AtMost(1e-6),
        )];
        let outcome = optimize(
            &volume,
            &plan,
            &structures,
            &objectives,
            &constraints,
            &machine(),
            &config(SearchStrategy::GradientDescent { step_size: 0.5 }),
            &ProgressReporter::new(),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(!outcome.feasible);
        assert!(outcome.constraint_violations.iter().any(|&v| v > 0.0));
    }

    #[test]
    fn identical_seeds_reproduce_identical_plans() {
        let (volume, plan, structures, id) = setup();
        let objectives = vec![Objective::new(
            id,
            ObjectiveKind::MeanDose {
                limit_gy: 2.0,
                direction: GoalDirection::AtLeast,
            },
            1.0,
        )];
        let strategy = SearchStrategy::SimulatedAnnealing {
            seed: 42,
            initial_temperature: 1.0,
            cooling_rate: 0.9,
            moves_per_iteration: 4,
        };
        let mut cfg = config(strategy);
        cfg.max_iterations = 5;

        let run = || {
            optimize(
                &volume,
                &plan,
                &structures,
                &objectives,
                &[],
                &machine(),
                &cfg,
                &ProgressReporter::new(),
                &CancelToken::new(),
            )
            .unwrap()
        };
        let a = run();
        let b = run();
        assert_eq!(a.cost_history, b.cost_history);
        for (ia, ib) in a
            .plan
            .beams_ordered()
            .zip(b.plan.beams_ordered())
        {
            assert_eq!(ia.1.control_points(), ib.1.control_points());
            assert_eq!(ia.1.fluence, ib.1.fluence);
        }
    }

    #[test]
    fn uncommissioned_inner_algorithm_is_rejected() {
        let (volume, plan, structures, id) = setup();
        let objectives = vec![Objective::new(
            id,
            ObjectiveKind::MinDose { limit_gy: 1.0 },
            1.0,
        )];
        let mut cfg = config(SearchStrategy::default());
        cfg.dose.algorithm = DoseAlgorithm::GridBoltzmann;
        let result = optimize(
            &volume,
            &plan,
            &structures,
            &objectives,
            &[],
            &machine(),
            &cfg,
            &ProgressReporter::new(),
            &CancelToken::new(),
        );
        assert!(matches!(
            result,
            Err(EngineError::UnsupportedAlgorithm { .. })
        ));
    }

    #[test]
    fn cancellation_aborts_optimization() {
        let (volume, plan, structures, id) = setup();
        let objectives = vec![Objective::new(
            id,
            ObjectiveKind::MinDose { limit_gy: 1.0 },
            1.0,
        )];
        let token = CancelToken::new();
        token.cancel();
        let result = optimize(
            &volume,
            &plan,
            &structures,
            &objectives,
            &[],
            &machine(),
            &config(SearchStrategy::default()),
            &ProgressReporter::new(),
            &token,
        );
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
