//! End-to-end planning: optimize fluence, sequence it into deliverable
//! apertures, recompute dose with the definitive algorithm, and score the
//! result.

use tracing::{info, instrument};

use crate::core::clinical::constraint::Constraint;
use crate::core::clinical::objective::Objective;
use crate::core::clinical::score::{composite_cost, CostBreakdown};
use crate::core::machine::MachineModel;
use crate::core::models::dose::DoseGrid;
use crate::core::models::plan::Plan;
use crate::core::models::structure::StructureSet;
use crate::core::models::volume::Volume;
use crate::engine::cancel::CancelToken;
use crate::engine::compute::compute_dose;
use crate::engine::config::{DoseConfig, OptimizationConfig, SequencerConfig};
use crate::engine::error::EngineError;
use crate::engine::optimizer::{optimize, OptimizationOutcome};
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::sequencer::{delivery_time_s, sequence_plan};

use super::evaluate::StructureReport;
use crate::core::metrics::dvh::Dvh;

#[derive(Debug)]
pub struct PlanningResult {
    pub outcome: OptimizationOutcome,
    /// Dose of the sequenced plan under the definitive algorithm.
    pub dose: DoseGrid,
    pub reports: Vec<StructureReport>,
    /// Cost of the final dose, which may differ from the optimizer's best
    /// cost after sequencing and the algorithm change.
    pub cost: CostBreakdown,
    pub delivery_time_s: f64,
}

/// Runs the full planning pipeline on a draft plan. The input plan is left
/// untouched; the sequenced result is returned inside [`PlanningResult`].
#[instrument(skip_all, name = "planning_workflow")]
#[allow(clippy::too_many_arguments)]
pub fn run(
    volume: &Volume,
    plan: &Plan,
    structures: &StructureSet,
    objectives: &[Objective],
    constraints: &[Constraint],
    machine: &MachineModel,
    optimization: &OptimizationConfig,
    final_dose: &DoseConfig,
    sequencer: &SequencerConfig,
    reporter: &ProgressReporter,
    cancel: &CancelToken,
) -> Result<PlanningResult, EngineError> {
    // === Phase 1: Fluence Optimization ===
    reporter.report(Progress::PhaseStart {
        name: "Fluence Optimization",
    });
    info!(
        beams = plan.beam_count(),
        objectives = objectives.len(),
        constraints = constraints.len(),
        "starting plan optimization"
    );
    let outcome = optimize(
        volume,
        plan,
        structures,
        objectives,
        constraints,
        machine,
        optimization,
        reporter,
        cancel,
    )?;
    reporter.report(Progress::PhaseFinish);

    // === Phase 2: Leaf Sequencing ===
    reporter.report(Progress::PhaseStart {
        name: "Leaf Sequencing",
    });
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    let mut sequenced = outcome.plan.clone();
    sequence_plan(&mut sequenced, machine, sequencer)?;
    let delivery: f64 = sequenced
        .beams_ordered()
        .map(|(_, beam)| delivery_time_s(beam.control_points(), machine))
        .sum();
    info!(delivery_time_s = delivery, "plan sequenced");
    reporter.report(Progress::PhaseFinish);

    // === Phase 3: Final Dose ===
    reporter.report(Progress::PhaseStart { name: "Final Dose" });
    let dose = compute_dose(volume, &sequenced, machine, final_dose, reporter, cancel)?;
    reporter.report(Progress::PhaseFinish);

    // === Phase 4: Metrics ===
    reporter.report(Progress::PhaseStart { name: "Metrics" });
    let mut reports = Vec::with_capacity(structures.len());
    for (id, structure) in structures.iter() {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        reports.push(StructureReport {
            structure: id,
            name: structure.name().to_string(),
            dvh: Dvh::new(&dose, structure)?,
        });
    }
    let cost = composite_cost(&dose, structures, objectives, constraints)?;
    reporter.report(Progress::PhaseFinish);

    info!(
        converged = outcome.converged,
        feasible = outcome.feasible,
        best_cost = outcome.best_cost,
        final_cost = cost.objective_cost,
        "planning complete"
    );
    Ok(PlanningResult {
        outcome: OptimizationOutcome {
            plan: sequenced,
            ..outcome
        },
        dose,
        reports,
        cost,
        delivery_time_s: delivery,
    })
}
