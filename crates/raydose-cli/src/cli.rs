use clap::{Args, Parser, Subcommand};
use raydose::physics::DoseAlgorithm;
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "raydose - a radiotherapy dose computation and plan optimization toolkit for synthetic phantom scenarios.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute the dose of a scenario's plan and report per-structure metrics.
    Compute(ComputeArgs),
    /// Optimize a scenario's plan against its objectives, sequence it, and
    /// report the final dose metrics.
    Optimize(OptimizeArgs),
}

#[derive(Args, Debug)]
pub struct ComputeArgs {
    /// Path to the scenario file (phantom, structures, beams) in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub scenario: PathBuf,

    /// Path to the machine commissioning file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub machine: PathBuf,

    /// Override the dose algorithm from the scenario file.
    #[arg(short, long, value_name = "NAME", value_parser = parse_algorithm)]
    pub algorithm: Option<DoseAlgorithm>,

    /// Override the calculation grid spacing in mm.
    #[arg(long, value_name = "MM")]
    pub grid_spacing: Option<f64>,

    /// Write per-structure cumulative DVH curves to a CSV file.
    #[arg(long, value_name = "PATH")]
    pub dvh: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct OptimizeArgs {
    /// Path to the scenario file (phantom, structures, beams, objectives) in
    /// TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub scenario: PathBuf,

    /// Path to the machine commissioning file in TOML format.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub machine: PathBuf,

    /// Override the definitive dose algorithm used for the final computation.
    #[arg(short, long, value_name = "NAME", value_parser = parse_algorithm)]
    pub algorithm: Option<DoseAlgorithm>,

    /// Override the maximum number of optimizer iterations.
    #[arg(long, value_name = "INT")]
    pub max_iterations: Option<usize>,

    /// Write per-structure cumulative DVH curves of the final dose to a CSV
    /// file.
    #[arg(long, value_name = "PATH")]
    pub dvh: Option<PathBuf>,
}

fn parse_algorithm(s: &str) -> Result<DoseAlgorithm, String> {
    match s {
        "pencil-beam" => Ok(DoseAlgorithm::PencilBeam),
        "collapsed-cone" => Ok(DoseAlgorithm::CollapsedCone),
        "anisotropic-analytical" => Ok(DoseAlgorithm::AnisotropicAnalytical),
        "grid-boltzmann" => Ok(DoseAlgorithm::GridBoltzmann),
        "fast-approximate" => Ok(DoseAlgorithm::FastApproximate),
        other => Err(format!(
            "unknown algorithm '{other}' (expected one of: pencil-beam, collapsed-cone, \
             anisotropic-analytical, grid-boltzmann, fast-approximate)"
        )),
    }
}
