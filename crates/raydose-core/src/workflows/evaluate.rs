//! Plan evaluation: compute the plan's dose and report per-structure DVH
//! metrics, plus the composite cost when clinical goals are supplied.

use tracing::{info, instrument};

use crate::core::clinical::constraint::Constraint;
use crate::core::clinical::objective::Objective;
use crate::core::clinical::score::{composite_cost, CostBreakdown};
use crate::core::machine::MachineModel;
use crate::core::metrics::dvh::Dvh;
use crate::core::models::dose::DoseGrid;
use crate::core::models::ids::StructureId;
use crate::core::models::plan::Plan;
use crate::core::models::structure::StructureSet;
use crate::core::models::volume::Volume;
use crate::engine::cancel::CancelToken;
use crate::engine::compute::compute_dose;
use crate::engine::config::DoseConfig;
use crate::engine::error::EngineError;
use crate::engine::progress::{Progress, ProgressReporter};

/// DVH summary of one structure under the evaluated dose.
#[derive(Debug, Clone)]
pub struct StructureReport {
    pub structure: StructureId,
    pub name: String,
    pub dvh: Dvh,
}

#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub dose: DoseGrid,
    pub reports: Vec<StructureReport>,
    /// Present when at least one objective or constraint was supplied.
    pub cost: Option<CostBreakdown>,
}

#[instrument(skip_all, name = "evaluation_workflow")]
#[allow(clippy::too_many_arguments)]
pub fn run(
    volume: &Volume,
    plan: &Plan,
    structures: &StructureSet,
    objectives: &[Objective],
    constraints: &[Constraint],
    machine: &MachineModel,
    config: &DoseConfig,
    reporter: &ProgressReporter,
    cancel: &CancelToken,
) -> Result<EvaluationResult, EngineError> {
    reporter.report(Progress::PhaseStart {
        name: "Dose Computation",
    });
    info!(
        beams = plan.beam_count(),
        algorithm = config.algorithm.label(),
        "evaluating plan"
    );
    let dose = compute_dose(volume, plan, machine, config, reporter, cancel)?;
    reporter.report(Progress::PhaseFinish);

    reporter.report(Progress::PhaseStart { name: "Metrics" });
    let mut reports = Vec::with_capacity(structures.len());
    for (id, structure) in structures.iter() {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let dvh = Dvh::new(&dose, structure)?;
        reports.push(StructureReport {
            structure: id,
            name: structure.name().to_string(),
            dvh,
        });
    }
    let cost = if objectives.is_empty() && constraints.is_empty() {
        None
    } else {
        Some(composite_cost(&dose, structures, objectives, constraints)?)
    };
    reporter.report(Progress::PhaseFinish);

    info!(
        structures = reports.len(),
        max_dose_gy = dose.max_dose(),
        "evaluation complete"
    );
    Ok(EvaluationResult {
        dose,
        reports,
        cost,
    })
}
