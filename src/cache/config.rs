//! Cache configuration.
//!
//! Controls the request cache via the `[cache]` section of `stowage.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

pub(crate) const DEFAULT_NAMESPACE: &str = "anarestan";
pub(crate) const DEFAULT_CAPACITY: usize = 1024;
pub(crate) const DEFAULT_TTL_SECONDS: u64 = 300;

pub(crate) fn default_vary_headers() -> Vec<String> {
    vec!["accept-language".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Serve and store cached responses.
    pub enabled: bool,
    /// Prefix of every key, usually the site name.
    pub namespace: String,
    /// Maximum entries kept before least-recently-used eviction.
    pub capacity: usize,
    /// Lifetime of an entry written without an explicit ttl.
    pub ttl_seconds: u64,
    /// Request headers that distinguish otherwise identical requests.
    pub vary_headers: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: DEFAULT_NAMESPACE.to_string(),
            capacity: DEFAULT_CAPACITY,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            vary_headers: default_vary_headers(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            namespace: settings.namespace.clone(),
            capacity: settings.capacity,
            ttl_seconds: settings.ttl_seconds,
            vary_headers: settings.vary_headers.clone(),
        }
    }
}

impl CacheConfig {
    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.namespace, "anarestan");
        assert_eq!(config.capacity, 1024);
        assert_eq!(config.default_ttl(), Duration::from_secs(300));
        assert_eq!(config.vary_headers, vec!["accept-language".to_string()]);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.capacity_non_zero().get(), 1);
    }
}
