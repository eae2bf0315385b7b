//! Scenario files: a TOML description of a synthetic phantom, its structures,
//! the beam arrangement, and the clinical goals. The core crate deliberately
//! defines no file format for these value objects; this module owns the
//! mapping from TOML to core types.

use std::path::Path;

use nalgebra::{Point3, Vector3};
use serde::Deserialize;
use tracing::debug;

use raydose::core::clinical::constraint::{Bound, Constraint, DoseMetric};
use raydose::core::clinical::objective::{GoalDirection, Objective, ObjectiveKind};
use raydose::core::models::beam::{Beam, EnergyClass, FluenceMap};
use raydose::core::models::grid::GridGeometry;
use raydose::core::models::plan::Plan;
use raydose::core::models::structure::{Structure, StructureSet};
use raydose::core::models::volume::Volume;
use raydose::engine::config::{
    ConvergenceConfig, DoseConfig, DoseConfigBuilder, OptimizationConfig,
    OptimizationConfigBuilder, SearchStrategy, SequencerConfig,
};
use raydose::physics::DoseAlgorithm;

use crate::error::{CliError, Result};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub phantom: PhantomSpec,
    #[serde(default, rename = "structure")]
    pub structures: Vec<StructureSpec>,
    #[serde(rename = "beam")]
    pub beams: Vec<BeamSpec>,
    #[serde(default, rename = "objective")]
    pub objectives: Vec<ObjectiveSpec>,
    #[serde(default, rename = "constraint")]
    pub constraints: Vec<ConstraintSpec>,
    #[serde(default)]
    pub dose: DoseSpec,
    #[serde(default)]
    pub optimization: OptimizationSpec,
    #[serde(default)]
    pub sequencer: SequencerSpec,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhantomSpec {
    pub dims: [usize; 3],
    pub spacing_mm: [f64; 3],
    pub origin_mm: [f64; 3],
    #[serde(default = "default_density")]
    pub density: f64,
    #[serde(default, rename = "insert")]
    pub inserts: Vec<InsertSpec>,
}

fn default_density() -> f64 {
    1.0
}

/// A density override region inside the phantom.
#[derive(Debug, Deserialize)]
#[serde(tag = "shape", rename_all = "kebab-case", deny_unknown_fields)]
pub enum InsertSpec {
    Sphere {
        center_mm: [f64; 3],
        radius_mm: f64,
        density: f64,
    },
    Box {
        min_mm: [f64; 3],
        max_mm: [f64; 3],
        density: f64,
    },
}

#[derive(Debug, Deserialize)]
pub struct StructureSpec {
    pub name: String,
    #[serde(flatten)]
    pub shape: ShapeSpec,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "shape", rename_all = "kebab-case")]
pub enum ShapeSpec {
    Sphere {
        center_mm: [f64; 3],
        radius_mm: f64,
    },
    Box {
        min_mm: [f64; 3],
        max_mm: [f64; 3],
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BeamSpec {
    pub energy: String,
    pub gantry_deg: f64,
    #[serde(default)]
    pub collimator_deg: f64,
    #[serde(default = "default_sad")]
    pub sad_mm: f64,
    #[serde(default)]
    pub isocenter_mm: [f64; 3],
    pub meterset_mu: f64,
    pub fluence: FluenceSpec,
}

fn default_sad() -> f64 {
    1000.0
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FluenceSpec {
    pub nx: usize,
    pub ny: usize,
    pub bixel_mm: f64,
    #[serde(default = "default_density")]
    pub value: f64,
}

#[derive(Debug, Deserialize)]
pub struct ObjectiveSpec {
    pub structure: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(flatten)]
    pub kind: ObjectiveKindSpec,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ObjectiveKindSpec {
    MeanDose {
        limit_gy: f64,
        direction: DirectionSpec,
    },
    MaxDose {
        limit_gy: f64,
    },
    MinDose {
        limit_gy: f64,
    },
    DoseAtVolume {
        percent: f64,
        limit_gy: f64,
        direction: DirectionSpec,
    },
    VolumeAtDose {
        dose_gy: f64,
        limit_fraction: f64,
        direction: DirectionSpec,
    },
    Eud {
        a: f64,
        limit_gy: f64,
        direction: DirectionSpec,
    },
    Tcp {
        d50_gy: f64,
        gamma: f64,
        target: f64,
    },
    Ntcp {
        td50_gy: f64,
        m: f64,
        limit: f64,
    },
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirectionSpec {
    AtMost,
    AtLeast,
}

impl From<DirectionSpec> for GoalDirection {
    fn from(d: DirectionSpec) -> Self {
        match d {
            DirectionSpec::AtMost => GoalDirection::AtMost,
            DirectionSpec::AtLeast => GoalDirection::AtLeast,
        }
    }
}

/// Exactly one of `at_most` / `at_least` must be present.
#[derive(Debug, Deserialize)]
pub struct ConstraintSpec {
    pub structure: String,
    #[serde(flatten)]
    pub metric: MetricSpec,
    pub at_most: Option<f64>,
    pub at_least: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "metric", rename_all = "kebab-case")]
pub enum MetricSpec {
    MinDose,
    MeanDose,
    MaxDose,
    DoseAtVolume { percent: f64 },
    VolumeAtDose { dose_gy: f64 },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DoseSpec {
    pub algorithm: Option<DoseAlgorithm>,
    pub grid_spacing_mm: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizationSpec {
    pub algorithm: Option<DoseAlgorithm>,
    pub max_iterations: Option<usize>,
    pub tolerance: Option<f64>,
    pub patience: Option<usize>,
    pub strategy: Option<StrategySpec>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum StrategySpec {
    GradientDescent {
        #[serde(default = "default_step_size")]
        step_size: f64,
    },
    SimulatedAnnealing {
        seed: u64,
        initial_temperature: f64,
        cooling_rate: f64,
        moves_per_iteration: usize,
    },
}

fn default_step_size() -> f64 {
    0.5
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SequencerSpec {
    pub max_error_fraction: Option<f64>,
    pub levels: Option<usize>,
}

impl Scenario {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let scenario: Scenario = toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        if scenario.beams.is_empty() {
            return Err(CliError::Config(
                "scenario defines no beams".to_string(),
            ));
        }
        debug!(
            beams = scenario.beams.len(),
            structures = scenario.structures.len(),
            "scenario loaded"
        );
        Ok(scenario)
    }

    pub fn build_volume(&self) -> Result<Volume> {
        let p = &self.phantom;
        let geometry = GridGeometry::new(
            p.dims,
            Vector3::new(p.spacing_mm[0], p.spacing_mm[1], p.spacing_mm[2]),
            Point3::new(p.origin_mm[0], p.origin_mm[1], p.origin_mm[2]),
        )
        .map_err(|e| CliError::Config(e.to_string()))?;

        let dims = geometry.dims();
        let mut densities = vec![p.density; geometry.voxel_count()];
        for insert in &p.inserts {
            for k in 0..dims[2] {
                for j in 0..dims[1] {
                    for i in 0..dims[0] {
                        let c = geometry.voxel_center(i, j, k);
                        let hit = match insert {
                            InsertSpec::Sphere {
                                center_mm,
                                radius_mm,
                                ..
                            } => {
                                let center =
                                    Point3::new(center_mm[0], center_mm[1], center_mm[2]);
                                (c - center).norm() <= *radius_mm
                            }
                            InsertSpec::Box { min_mm, max_mm, .. } => {
                                (0..3).all(|a| c[a] >= min_mm[a] && c[a] <= max_mm[a])
                            }
                        };
                        if hit {
                            let density = match insert {
                                InsertSpec::Sphere { density, .. }
                                | InsertSpec::Box { density, .. } => *density,
                            };
                            densities[geometry.linear_index(i, j, k)] = density;
                        }
                    }
                }
            }
        }
        Volume::new(geometry, densities).map_err(|e| CliError::Config(e.to_string()))
    }

    pub fn build_structures(&self, volume: &Volume) -> Result<StructureSet> {
        let geometry = volume.geometry();
        let mut set = StructureSet::new();
        for spec in &self.structures {
            let structure = match &spec.shape {
                ShapeSpec::Sphere {
                    center_mm,
                    radius_mm,
                } => Structure::sphere(
                    &spec.name,
                    geometry,
                    Point3::new(center_mm[0], center_mm[1], center_mm[2]),
                    *radius_mm,
                ),
                ShapeSpec::Box { min_mm, max_mm } => Structure::cuboid(
                    &spec.name,
                    geometry,
                    Point3::new(min_mm[0], min_mm[1], min_mm[2]),
                    Point3::new(max_mm[0], max_mm[1], max_mm[2]),
                ),
            }
            .map_err(|e| CliError::Config(e.to_string()))?;
            set.insert(structure);
        }
        Ok(set)
    }

    pub fn build_plan(&self) -> Result<Plan> {
        let mut plan = Plan::new();
        for spec in &self.beams {
            let energy: EnergyClass = spec
                .energy
                .parse()
                .map_err(|e: raydose::core::models::ModelError| CliError::Config(e.to_string()))?;
            let fluence = FluenceMap::uniform(
                spec.fluence.nx,
                spec.fluence.ny,
                spec.fluence.bixel_mm,
                spec.fluence.value,
            )
            .map_err(|e| CliError::Config(e.to_string()))?;
            let beam = Beam::new(
                energy,
                spec.sad_mm,
                Point3::new(
                    spec.isocenter_mm[0],
                    spec.isocenter_mm[1],
                    spec.isocenter_mm[2],
                ),
                spec.gantry_deg,
                spec.collimator_deg,
                fluence,
                spec.meterset_mu,
            )
            .map_err(|e| CliError::Config(e.to_string()))?;
            plan.add_beam(beam)
                .map_err(|e| CliError::Config(e.to_string()))?;
        }
        Ok(plan)
    }

    pub fn build_objectives(&self, structures: &StructureSet) -> Result<Vec<Objective>> {
        self.objectives
            .iter()
            .map(|spec| {
                let (id, _) = structures.by_name(&spec.structure).ok_or_else(|| {
                    CliError::Config(format!(
                        "objective references unknown structure '{}'",
                        spec.structure
                    ))
                })?;
                Ok(Objective::new(id, spec.kind.to_core(), spec.weight))
            })
            .collect()
    }

    pub fn build_constraints(&self, structures: &StructureSet) -> Result<Vec<Constraint>> {
        self.constraints
            .iter()
            .map(|spec| {
                let (id, _) = structures.by_name(&spec.structure).ok_or_else(|| {
                    CliError::Config(format!(
                        "constraint references unknown structure '{}'",
                        spec.structure
                    ))
                })?;
                let bound = match (spec.at_most, spec.at_least) {
                    (Some(limit), None) => Bound::AtMost(limit),
                    (None, Some(limit)) => Bound::AtLeast(limit),
                    _ => {
                        return Err(CliError::Config(format!(
                            "constraint on '{}' needs exactly one of at_most/at_least",
                            spec.structure
                        )));
                    }
                };
                Ok(Constraint::new(id, spec.metric.to_core(), bound))
            })
            .collect()
    }

    /// Dose config for the `compute` command; `algorithm_override` comes from
    /// the command line and wins over the scenario's `[dose]` table.
    pub fn build_dose_config(
        &self,
        algorithm_override: Option<DoseAlgorithm>,
        grid_spacing_override: Option<f64>,
    ) -> Result<DoseConfig> {
        let mut builder = DoseConfigBuilder::new();
        if let Some(algorithm) = algorithm_override.or(self.dose.algorithm) {
            builder = builder.algorithm(algorithm);
        }
        if let Some(spacing) = grid_spacing_override.or(self.dose.grid_spacing_mm) {
            builder = builder.grid_spacing_mm(spacing);
        }
        Ok(builder.build()?)
    }

    pub fn build_optimization_config(
        &self,
        max_iterations_override: Option<usize>,
    ) -> Result<OptimizationConfig> {
        let spec = &self.optimization;
        let mut builder = OptimizationConfigBuilder::new();
        if let Some(algorithm) = spec.algorithm {
            builder = builder.algorithm(algorithm);
        }
        let max_iterations = max_iterations_override
            .or(spec.max_iterations)
            .unwrap_or(50);
        builder = builder.max_iterations(max_iterations);
        if spec.tolerance.is_some() || spec.patience.is_some() {
            let defaults = ConvergenceConfig::default();
            builder = builder.convergence(ConvergenceConfig {
                tolerance: spec.tolerance.unwrap_or(defaults.tolerance),
                patience: spec.patience.unwrap_or(defaults.patience),
            });
        }
        if let Some(strategy) = &spec.strategy {
            builder = builder.strategy(match strategy {
                StrategySpec::GradientDescent { step_size } => SearchStrategy::GradientDescent {
                    step_size: *step_size,
                },
                StrategySpec::SimulatedAnnealing {
                    seed,
                    initial_temperature,
                    cooling_rate,
                    moves_per_iteration,
                } => SearchStrategy::SimulatedAnnealing {
                    seed: *seed,
                    initial_temperature: *initial_temperature,
                    cooling_rate: *cooling_rate,
                    moves_per_iteration: *moves_per_iteration,
                },
            });
        }
        Ok(builder.build()?)
    }

    pub fn build_sequencer_config(&self) -> SequencerConfig {
        let defaults = SequencerConfig::default();
        SequencerConfig {
            max_error_fraction: self
                .sequencer
                .max_error_fraction
                .unwrap_or(defaults.max_error_fraction),
            levels: self.sequencer.levels.unwrap_or(defaults.levels),
        }
    }
}

impl ObjectiveKindSpec {
    fn to_core(&self) -> ObjectiveKind {
        match *self {
            ObjectiveKindSpec::MeanDose {
                limit_gy,
                direction,
            } => ObjectiveKind::MeanDose {
                limit_gy,
                direction: direction.into(),
            },
            ObjectiveKindSpec::MaxDose { limit_gy } => ObjectiveKind::MaxDose { limit_gy },
            ObjectiveKindSpec::MinDose { limit_gy } => ObjectiveKind::MinDose { limit_gy },
            ObjectiveKindSpec::DoseAtVolume {
                percent,
                limit_gy,
                direction,
            } => ObjectiveKind::DoseAtVolume {
                percent,
                limit_gy,
                direction: direction.into(),
            },
            ObjectiveKindSpec::VolumeAtDose {
                dose_gy,
                limit_fraction,
                direction,
            } => ObjectiveKind::VolumeAtDose {
                dose_gy,
                limit_fraction,
                direction: direction.into(),
            },
            ObjectiveKindSpec::Eud {
                a,
                limit_gy,
                direction,
            } => ObjectiveKind::Eud {
                a,
                limit_gy,
                direction: direction.into(),
            },
            ObjectiveKindSpec::Tcp {
                d50_gy,
                gamma,
                target,
            } => ObjectiveKind::Tcp {
                d50_gy,
                gamma,
                target,
            },
            ObjectiveKindSpec::Ntcp { td50_gy, m, limit } => {
                ObjectiveKind::Ntcp { td50_gy, m, limit }
            }
        }
    }
}

impl MetricSpec {
    fn to_core(&self) -> DoseMetric {
        match *self {
            MetricSpec::MinDose => DoseMetric::MinDose,
            MetricSpec::MeanDose => DoseMetric::MeanDose,
            MetricSpec::MaxDose => DoseMetric::MaxDose,
            MetricSpec::DoseAtVolume { percent } => DoseMetric::DoseAtVolume { percent },
            MetricSpec::VolumeAtDose { dose_gy } => DoseMetric::VolumeAtDose { dose_gy },
        }
    }
}
