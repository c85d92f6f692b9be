//! Persist application state containers to web-style storage.
//!
//! A [`PersistEngine`](application::persist::PersistEngine) restores a
//! container from storage when it is attached and writes it back after
//! every mutation, optionally projecting selected fields, sealing the
//! payload with AES-256-GCM and throttling writes. The [`cache`] module
//! holds the storefront's read-through response cache.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;

#[cfg(test)]
pub(crate) mod test_support;
