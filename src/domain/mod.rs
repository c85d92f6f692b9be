//! Domain layer types and invariants.

pub mod container;
pub mod error;
pub mod snapshot;
