use crate::cli::ComputeArgs;
use crate::error::Result;
use crate::progress::CliProgressHandler;
use crate::scenario::Scenario;
use raydose::core::machine::MachineModel;
use raydose::engine::cancel::CancelToken;
use raydose::engine::progress::ProgressReporter;
use raydose::workflows;
use tracing::info;

pub fn run(args: ComputeArgs) -> Result<()> {
    let scenario = Scenario::from_file(&args.scenario)?;
    let machine = MachineModel::load(&args.machine)?;
    info!("Machine '{}' loaded.", machine.name);

    let volume = scenario.build_volume()?;
    let structures = scenario.build_structures(&volume)?;
    let plan = scenario.build_plan()?;
    let objectives = scenario.build_objectives(&structures)?;
    let constraints = scenario.build_constraints(&structures)?;
    let config = scenario.build_dose_config(args.algorithm, args.grid_spacing)?;

    let progress_handler = CliProgressHandler::new();
    let reporter = ProgressReporter::with_callback(progress_handler.get_callback());
    let cancel = CancelToken::new();

    println!(
        "Computing dose with '{}' for {} beam(s)...",
        config.algorithm.label(),
        plan.beam_count()
    );
    let result = workflows::evaluate::run(
        &volume,
        &plan,
        &structures,
        &objectives,
        &constraints,
        &machine,
        &config,
        &reporter,
        &cancel,
    )?;

    println!(
        "Dose computed: max {:.3} Gy over {} voxels.",
        result.dose.max_dose(),
        result.dose.geometry().voxel_count()
    );
    super::print_structure_summary(&result.reports);
    if let Some(cost) = &result.cost {
        println!(
            "Objective cost {:.4}, total constraint violation {:.4}.",
            cost.objective_cost,
            cost.total_violation()
        );
    }

    if let Some(path) = &args.dvh {
        super::write_dvh_csv(path, &result.reports)?;
        println!("DVH curves written to: {}", path.display());
    }

    Ok(())
}
