//! Stowage request cache.
//!
//! Read-through caching of rendered storefront responses in an in-memory
//! TTL store, keyed either by entity (`{ns}:category:{canonical}`) or by a
//! request fingerprint (`{ns}:req:{sha256}`).
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! namespace = "anarestan"
//! capacity = 1024
//! ttl_seconds = 300
//! vary_headers = ["accept-language"]
//! ```

mod config;
mod keys;
mod layer;
mod store;

pub use config::CacheConfig;
pub use keys::{CacheError, CacheKey, EntityKind, RequestFingerprint};
pub use layer::{Cached, ResponseCache};
pub use store::MemoryKv;

pub(crate) use config::{DEFAULT_CAPACITY, DEFAULT_NAMESPACE, DEFAULT_TTL_SECONDS, default_vary_headers};
