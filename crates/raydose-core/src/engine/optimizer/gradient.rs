//! Projected gradient descent on per-beam fluence weights.
//!
//! The influence model makes the cost a cheap function of the weight vector,
//! so the gradient is taken by central finite differences and each step is
//! projected back onto the non-negative orthant. The trajectory is fully
//! deterministic.

use tracing::debug;

use super::search_cost;
use crate::core::clinical::constraint::Constraint;
use crate::core::clinical::objective::Objective;
use crate::core::clinical::score::CostBreakdown;
use crate::engine::cancel::CancelToken;
use crate::engine::config::OptimizationConfig;
use crate::engine::error::EngineError;
use crate::engine::influence::InfluenceModel;
use crate::engine::progress::{Progress, ProgressReporter};

pub(crate) struct GradientResult {
    pub weights: Vec<f64>,
    pub history: Vec<f64>,
    pub converged: bool,
    pub iterations: usize,
    pub breakdown: CostBreakdown,
}

pub(crate) fn run(
    model: &InfluenceModel,
    objectives: &[Objective],
    constraints: &[Constraint],
    config: &OptimizationConfig,
    step_size: f64,
    reporter: &ProgressReporter,
    cancel: &CancelToken,
) -> Result<GradientResult, EngineError> {
    let n = model.beam_count();
    let mut weights = vec![1.0; n];
    let mut history = Vec::with_capacity(config.max_iterations);
    let mut best_weights = weights.clone();
    let mut best_cost = f64::INFINITY;
    let mut stalled = 0;
    let mut converged = false;
    let mut iterations = 0;

    let cost_of = |w: &[f64]| -> Result<f64, EngineError> {
        Ok(search_cost(&model.cost(w, objectives, constraints)?))
    };

    let mut previous = cost_of(&weights)?;
    for iteration in 0..config.max_iterations {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        iterations = iteration + 1;

        // Central differences, one-sided at the w = 0 boundary.
        let mut gradient = vec![0.0; n];
        for i in 0..n {
            let eps = 1e-3 * weights[i].max(1.0);
            let mut upper = weights.clone();
            upper[i] += eps;
            let mut lower = weights.clone();
            lower[i] = (lower[i] - eps).max(0.0);
            let span = upper[i] - lower[i];
            gradient[i] = (cost_of(&upper)? - cost_of(&lower)?) / span;
        }
        let norm = gradient.iter().map(|g| g * g).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (w, g) in weights.iter_mut().zip(&gradient) {
                *w = (*w - step_size * g / norm).max(0.0);
            }
        }

        let current = cost_of(&weights)?;
        history.push(current);
        reporter.report(Progress::IterationUpdate {
            iteration,
            cost: current,
        });
        if current < best_cost {
            best_cost = current;
            best_weights = weights.clone();
        }

        let improvement = (previous - current) / previous.abs().max(1e-12);
        if improvement < config.convergence.tolerance {
            stalled += 1;
            if stalled >= config.convergence.patience || norm == 0.0 {
                converged = true;
                break;
            }
        } else {
            stalled = 0;
        }
        previous = current;
    }

    debug!(best_cost, iterations, converged, "gradient search done");
    let breakdown = model.cost(&best_weights, objectives, constraints)?;
    Ok(GradientResult {
        weights: best_weights,
        history,
        converged,
        iterations,
        breakdown,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clinical::objective::{GoalDirection, ObjectiveKind};
    use crate::core::models::beam::{Beam, EnergyClass, FluenceMap};
    use crate::core::models::grid::GridGeometry;
    use crate::core::models::plan::Plan;
    use crate::core::models::structure::{Structure, StructureSet};
    use crate::core::models::volume::Volume;
    use crate::engine::config::{ConvergenceConfig, DoseConfig, OptimizationConfig, SearchStrategy};
    use crate::physics::DoseAlgorithm;
    use nalgebra::{Point3, Vector3};

    fn setup() -> (InfluenceModel, Vec<Objective>, OptimizationConfig) {
        let g = GridGeometry::new(
            [10, 10, 10],
            Vector3::new(5.0, 5.0, 5.0),
            Point3::new(-25.0, -25.0, -25.0),
        )
        .unwrap();
        let volume = Volume::uniform(g.clone(), 1.0).unwrap();
        let mut plan = Plan::new();
        for gantry in [0.0, 120.0] {
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
        let objectives = vec![Objective::new(
            id,
            ObjectiveKind::MeanDose {
                limit_gy: 1.5,
                direction: GoalDirection::AtLeast,
            },
            1.0,
        )];
        let config = OptimizationConfig {
            dose: DoseConfig {
                algorithm: DoseAlgorithm::PencilBeam,
                grid_spacing_mm: None,
                physics: Default::default(),
                max_divergent_fraction: 1e-3,
            },
            max_iterations: 60,
            convergence: ConvergenceConfig::default(),
            strategy: SearchStrategy::GradientDescent { step_size: 0.25 },
        };
        let model = InfluenceModel::build(
            &volume,
            &plan,
            &structures,
            &objectives,
            &[],
            &config.dose,
            &CancelToken::new(),
        )
        .unwrap();
        (model, objectives, config)
    }

    #[test]
    fn descent_never_increases_the_best_cost() {
        let (model, objectives, config) = setup();
        let result = run(
            &model,
            &objectives,
            &[],
            &config,
            0.25,
            &ProgressReporter::new(),
            &CancelToken::new(),
        )
        .unwrap();
        let mut best_so_far = f64::INFINITY;
        for &c in &result.history {
            best_so_far = best_so_far.min(c);
        }
        assert!(search_cost(&result.breakdown) <= best_so_far + 1e-9);
    }

    #[test]
    fn descent_is_deterministic() {
        let (model, objectives, config) = setup();
        let once = run(
            &model,
            &objectives,
            &[],
            &config,
            0.25,
            &ProgressReporter::new(),
            &CancelToken::new(),
        )
        .unwrap();
        let twice = run(
            &model,
            &objectives,
            &[],
            &config,
            0.25,
            &ProgressReporter::new(),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(once.weights, twice.weights);
        assert_eq!(once.history, twice.history);
    }

    #[test]
    fn weights_stay_non_negative() {
        let (model, objectives, mut config) = setup();
        config.max_iterations = 200;
        let result = run(
            &model,
            &objectives,
            &[],
            &config,
            5.0,
            &ProgressReporter::new(),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(result.weights.iter().all(|&w| w >= 0.0));
    }
}
