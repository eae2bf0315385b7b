use crate::cli::OptimizeArgs;
use crate::error::{CliError, Result};
use crate::progress::CliProgressHandler;
use crate::scenario::Scenario;
use raydose::core::machine::MachineModel;
use raydose::engine::cancel::CancelToken;
use raydose::engine::progress::ProgressReporter;
use raydose::workflows;
use tracing::{info, warn};

pub fn run(args: OptimizeArgs) -> Result<()> {
    let scenario = Scenario::from_file(&args.scenario)?;
    let machine = MachineModel::load(&args.machine)?;
    info!("Machine '{}' loaded.", machine.name);

    let volume = scenario.build_volume()?;
    let structures = scenario.build_structures(&volume)?;
    let plan = scenario.build_plan()?;
    let objectives = scenario.build_objectives(&structures)?;
    let constraints = scenario.build_constraints(&structures)?;
    if objectives.is_empty() && constraints.is_empty() {
        return Err(CliError::Config(
            "optimization needs at least one objective or constraint".to_string(),
        ));
    }

    let optimization = scenario.build_optimization_config(args.max_iterations)?;
    let final_dose = scenario.build_dose_config(args.algorithm, None)?;
    let sequencer = scenario.build_sequencer_config();

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());
    let cancel = CancelToken::new();

    println!(
        "Optimizing {} beam(s) against {} objective(s) and {} constraint(s)...",
        plan.beam_count(),
        objectives.len(),
        constraints.len()
    );
    let result = workflows::optimize::run(
        &volume,
        &plan,
        &structures,
        &objectives,
        &constraints,
        &machine,
        &optimization,
        &final_dose,
        &sequencer,
        &reporter,
        &cancel,
    )?;

    let outcome = &result.outcome;
    println!(
        "Optimization finished after {} iteration(s): best cost {:.4}.",
        outcome.iterations, outcome.best_cost
    );
    if !outcome.converged {
        warn!("Optimizer stopped at the iteration budget without converging.");
        println!("Warning: the optimizer did not converge within its budget.");
    }
    if !outcome.feasible {
        warn!(
            "Plan violates hard constraints (total violation {:.4}).",
            outcome.constraint_violations.iter().sum::<f64>()
        );
        println!("Warning: the plan is infeasible; constraint violations remain.");
    }

    let segments: usize = outcome
        .plan
        .beams_ordered()
        .map(|(_, beam)| beam.control_points().len())
        .sum();
    println!(
        "Sequenced {} control point(s) across {} beam(s); estimated delivery {:.1} s.",
        segments,
        outcome.plan.beam_count(),
        result.delivery_time_s
    );
    println!(
        "Final dose ('{}'): max {:.3} Gy, objective cost {:.4}.",
        final_dose.algorithm.label(),
        result.dose.max_dose(),
        result.cost.objective_cost
    );
    super::print_structure_summary(&result.reports);

    if let Some(path) = &args.dvh {
        super::write_dvh_csv(path, &result.reports)?;
        println!("DVH curves written to: {}", path.display());
    }

    Ok(())
}
