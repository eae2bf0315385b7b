//! # RAYDOSE Core Library
//!
//! A radiotherapy dose computation and plan optimization core: volumetric
//! dose engines, dose-volume metrics, fluence optimization, and MLC leaf
//! sequencing.
//!
//! ## Architectural Philosophy
//!
//! The library is designed with a strict layered architecture to ensure a clear
//! separation of concerns, making it modular, testable, and extensible.
//!
//! - **[`core`]: The Foundation.** Contains stateless data models (`Volume`,
//!   `Structure`, `Beam`, `DoseGrid`, `Plan`), clinical objective and constraint
//!   value types, dose-volume metrics, and loaders for machine commissioning data.
//!
//! - **[`physics`]: The Algorithm Strategy Set.** Five interchangeable dose
//!   calculation algorithms behind one closed enum (`DoseAlgorithm`), sharing
//!   ray-tracing and kernel utilities. Each maps primary beam fluence plus a
//!   density volume to a per-beam dose grid.
//!
//! - **[`engine`]: The Logic Core.** This stateful layer orchestrates dose
//!   computation (`compute_dose`), the iterative plan optimization loop
//!   (`optimize`), and the leaf sequencer, with cooperative cancellation and
//!   progress reporting. Each invocation is a pure function of its inputs; no
//!   state persists between calls.
//!
//! - **[`workflows`]: The Public API.** The highest-level, user-facing layer.
//!   It ties the `engine` and `core` together to execute complete planning
//!   procedures: plan evaluation and end-to-end plan optimization.

pub mod core;
pub mod engine;
pub mod physics;
pub mod workflows;
