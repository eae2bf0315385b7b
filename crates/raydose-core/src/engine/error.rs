//! Engine-layer error type.

use thiserror::Error;

use crate::core::machine::DataLoadError;
use crate::core::metrics::MetricsError;
use crate::core::models::beam::EnergyClass;
use crate::core::models::grid::GridError;
use crate::core::models::ModelError;
use crate::physics::DoseAlgorithm;

/// Errors surfaced by dose computation, optimization, and sequencing.
///
/// Advisory conditions (non-convergence, residual constraint violations) are
/// NOT errors; they are reported as flags on the optimization outcome.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A beam's ray cone never intersects the volume, or the inputs disagree
    /// on grid geometry in a way that has no meaningful interpretation.
    #[error("beam {beam_index} does not intersect the patient volume")]
    InvalidGeometry { beam_index: usize },

    #[error("algorithm '{}' is not commissioned on machine '{machine}'", .algorithm.label())]
    UnsupportedAlgorithm {
        algorithm: DoseAlgorithm,
        machine: String,
    },

    #[error("beam energy {} is not commissioned on machine '{machine}'", .energy.label())]
    EnergyNotCommissioned {
        energy: EnergyClass,
        machine: String,
    },

    /// Non-finite dose voxels beyond the tolerated fraction, or a transport
    /// solve that exhausted its sweep budget without meeting its residual.
    #[error("numerical divergence: {fraction:.3e} exceeds the allowed {limit:.3e}")]
    NumericalDivergence { fraction: f64, limit: f64 },

    /// The requested fluence cannot be realized as deliverable MLC segments
    /// within machine limits and the sequencing error tolerance.
    #[error("fluence is not deliverable: {reason}")]
    UndeliverableFluence { reason: String },

    /// The operation observed its cancellation token. Partial results are
    /// discarded; inputs are left untouched.
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Data(#[from] DataLoadError),

    #[error("internal engine error: {0}")]
    Internal(String),
}
