//! # Public API
//!
//! Complete planning procedures tying the `engine` and `core` layers
//! together: scoring an existing plan ([`evaluate`]) and the full
//! optimize-sequence-recompute pipeline ([`optimize`]). These are the entry
//! points external callers and the CLI use.

pub mod evaluate;
pub mod optimize;
