//! Stateless data models for the dose computation core.
//!
//! Every type in this module is a plain value object: grids, volumes,
//! structure masks, beams, and plans carry no computational state and are
//! validated once at construction. The engine layer never mutates them in
//! place except through the explicit `Plan` lifecycle API.

pub mod beam;
pub mod dose;
pub mod grid;
pub mod ids;
pub mod plan;
pub mod structure;
pub mod volume;

use thiserror::Error;

use self::beam::EnergyClass;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Density value at voxel {index} is invalid: {value} (must be finite and non-negative)")]
    InvalidDensity { index: usize, value: f64 },

    #[error("Data length {actual} does not match grid voxel count {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Beam has no control points; at least one is required")]
    NoControlPoints,

    #[error(
        "Cumulative meterset decreases at control point {index}: {value} MU after {previous} MU"
    )]
    DecreasingMeterset {
        index: usize,
        previous: f64,
        value: f64,
    },

    #[error("Leaf pair {index} crosses: left edge {left} mm is beyond right edge {right} mm")]
    CrossedLeaves { index: usize, left: f64, right: f64 },

    #[error("Unknown energy class name: '{0}'")]
    UnknownEnergy(String),

    #[error("Energy class {0:?} requires a positive source-axis distance")]
    InvalidSad(EnergyClass),

    #[error("Plan is frozen (approved) and can no longer be modified")]
    PlanFrozen,

    #[error("Fluence value at bixel {index} is invalid: {value} (must be finite and non-negative)")]
    InvalidFluence { index: usize, value: f64 },
}
