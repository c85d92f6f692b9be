//! Infrastructure adapters and runtime bootstrap.

pub mod crypto;
pub mod error;
pub mod storage;
pub mod telemetry;
