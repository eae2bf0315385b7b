//! Clinical goal definitions: objectives (soft, weighted) and constraints
//! (hard, feasibility-defining), plus the single deterministic scoring
//! function that combines them.
//!
//! Objectives and constraints are immutable value types; the optimizer never
//! learns anything about them beyond their penalty and violation numbers.

pub mod constraint;
pub mod objective;
pub mod score;

pub use constraint::{Bound, Constraint, DoseMetric};
pub use objective::{GoalDirection, Objective, ObjectiveKind};
pub use score::{CostBreakdown, composite_cost};
