use thiserror::Error;

use crate::physics::{DoseAlgorithm, PhysicsOptions};

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
}

/// Convergence test of the iterative optimizer: stop once the relative cost
/// improvement stays below `tolerance` for `patience` consecutive iterations.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceConfig {
    pub tolerance: f64,
    pub patience: usize,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-4,
            patience: 5,
        }
    }
}

/// Search strategy of the fluence optimization loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchStrategy {
    /// Deterministic projected gradient descent on per-beam weights.
    GradientDescent { step_size: f64 },
    /// Seeded Metropolis search over leaf openings; identical seeds yield
    /// identical optimization trajectories.
    SimulatedAnnealing {
        seed: u64,
        initial_temperature: f64,
        cooling_rate: f64,
        moves_per_iteration: usize,
    },
}

impl Default for SearchStrategy {
    fn default() -> Self {
        SearchStrategy::GradientDescent { step_size: 0.5 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoseConfig {
    pub algorithm: DoseAlgorithm,
    /// Calculation grid spacing (mm); `None` computes on the volume's grid.
    pub grid_spacing_mm: Option<f64>,
    pub physics: PhysicsOptions,
    /// Tolerated fraction of non-finite voxels before the computation is
    /// declared divergent.
    pub max_divergent_fraction: f64,
}

#[derive(Default)]
pub struct DoseConfigBuilder {
    algorithm: Option<DoseAlgorithm>,
    grid_spacing_mm: Option<f64>,
    physics: Option<PhysicsOptions>,
    max_divergent_fraction: Option<f64>,
}

impl DoseConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn algorithm(mut self, algorithm: DoseAlgorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }
    pub fn grid_spacing_mm(mut self, spacing: f64) -> Self {
        self.grid_spacing_mm = Some(spacing);
        self
    }
    pub fn physics(mut self, options: PhysicsOptions) -> Self {
        self.physics = Some(options);
        self
    }
    pub fn max_divergent_fraction(mut self, fraction: f64) -> Self {
        self.max_divergent_fraction = Some(fraction);
        self
    }

    pub fn build(self) -> Result<DoseConfig, ConfigError> {
        Ok(DoseConfig {
            algorithm: self
                .algorithm
                .ok_or(ConfigError::MissingParameter("algorithm"))?,
            grid_spacing_mm: self.grid_spacing_mm,
            physics: self.physics.unwrap_or_default(),
            max_divergent_fraction: self.max_divergent_fraction.unwrap_or(1e-3),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationConfig {
    /// Dose engine of the optimizer's inner loop; typically the fast
    /// approximate algorithm.
    pub dose: DoseConfig,
    pub max_iterations: usize,
    pub convergence: ConvergenceConfig,
    pub strategy: SearchStrategy,
}

#[derive(Default)]
pub struct OptimizationConfigBuilder {
    algorithm: Option<DoseAlgorithm>,
    grid_spacing_mm: Option<f64>,
    physics: Option<PhysicsOptions>,
    max_iterations: Option<usize>,
    convergence: Option<ConvergenceConfig>,
    strategy: Option<SearchStrategy>,
}

impl OptimizationConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn algorithm(mut self, algorithm: DoseAlgorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }
    pub fn grid_spacing_mm(mut self, spacing: f64) -> Self {
        self.grid_spacing_mm = Some(spacing);
        self
    }
    pub fn physics(mut self, options: PhysicsOptions) -> Self {
        self.physics = Some(options);
        self
    }
    pub fn max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = Some(iterations);
        self
    }
    pub fn convergence(mut self, convergence: ConvergenceConfig) -> Self {
        self.convergence = Some(convergence);
        self
    }
    pub fn strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn build(self) -> Result<OptimizationConfig, ConfigError> {
        let dose = DoseConfig {
            algorithm: self.algorithm.unwrap_or(DoseAlgorithm::FastApproximate),
            grid_spacing_mm: self.grid_spacing_mm,
            physics: self.physics.unwrap_or_default(),
            max_divergent_fraction: 1e-3,
        };
        Ok(OptimizationConfig {
            dose,
            max_iterations: self
                .max_iterations
                .ok_or(ConfigError::MissingParameter("max_iterations"))?,
            convergence: self.convergence.unwrap_or_default(),
            strategy: self.strategy.unwrap_or_default(),
        })
    }
}

/// Leaf sequencing limits beyond what the machine model imposes.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerConfig {
    /// Maximum tolerated relative difference between the requested fluence
    /// and the fluence reconstructed from the emitted segments.
    pub max_error_fraction: f64,
    /// Number of fluence quantization levels of the decomposition.
    pub levels: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            max_error_fraction: 0.05,
            levels: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dose_config_requires_an_algorithm() {
        let result = DoseConfigBuilder::new().build();
        assert_eq!(result, Err(ConfigError::MissingParameter("algorithm")));
    }

    #[test]
    fn dose_config_defaults_are_filled_in() {
        let config = DoseConfigBuilder::new()
            .algorithm(DoseAlgorithm::PencilBeam)
            .build()
            .unwrap();
        assert_eq!(config.grid_spacing_mm, None);
        assert_eq!(config.max_divergent_fraction, 1e-3);
        assert_eq!(config.physics, PhysicsOptions::default());
    }

    #[test]
    fn optimization_config_requires_max_iterations() {
        let result = OptimizationConfigBuilder::new().build();
        assert_eq!(result, Err(ConfigError::MissingParameter("max_iterations")));
    }

    #[test]
    fn optimization_inner_loop_defaults_to_the_fast_algorithm() {
        let config = OptimizationConfigBuilder::new()
            .max_iterations(50)
            .build()
            .unwrap();
        assert_eq!(config.dose.algorithm, DoseAlgorithm::FastApproximate);
        assert_eq!(config.convergence, ConvergenceConfig::default());
    }
}
