//! Application services: throttling and the persistence orchestrator.

pub mod error;
pub mod persist;
pub mod throttle;
