//! # Logic Core
//!
//! Stateful orchestration over the `core` models and the `physics` strategy
//! set: full-plan dose computation, the iterative fluence optimization loop,
//! and MLC leaf sequencing. Every entry point is a pure function of its
//! inputs, reports progress through a callback, and honors a cooperative
//! [`cancel::CancelToken`].

pub mod cancel;
pub mod compute;
pub mod config;
pub mod error;
pub mod influence;
pub mod optimizer;
pub mod progress;
pub mod sequencer;
