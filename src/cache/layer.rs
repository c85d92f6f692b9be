//! Read-through response cache.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use tracing::{debug, instrument};

use super::config::CacheConfig;
use super::keys::{CacheError, CacheKey, EntityKind, RequestFingerprint};
use super::store::MemoryKv;

/// A response body and whether it was served from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cached {
    pub body: Bytes,
    pub from_cache: bool,
}

#[derive(Clone)]
pub struct ResponseCache {
    config: CacheConfig,
    kv: Arc<MemoryKv>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        let kv = Arc::new(MemoryKv::from_config(&config));
        Self { config, kv }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MemoryKv> {
        &self.kv
    }

    /// Key for a request under this cache's namespace and vary headers.
    pub fn request_key(
        &self,
        path: &str,
        query: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Result<CacheKey, CacheError> {
        let fingerprint =
            RequestFingerprint::from_parts(path, query, headers, &self.config.vary_headers)?;
        Ok(CacheKey::request(&self.config.namespace, &fingerprint))
    }

    pub fn entity_key(&self, kind: EntityKind, canonical: &str) -> CacheKey {
        CacheKey::entity(&self.config.namespace, kind, canonical)
    }

    pub fn settings_key(&self) -> CacheKey {
        CacheKey::settings(&self.config.namespace)
    }

    /// Serve `key` from the cache, or run `fetch` and store its success.
    ///
    /// Failures are returned as-is and never cached. `ttl` defaults to the
    /// configured lifetime.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &CacheKey,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<Cached, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        if !self.config.enabled {
            return fetch().await.map(|body| Cached {
                body,
                from_cache: false,
            });
        }

        if let Some(body) = self.kv.get(key.as_str()) {
            counter!("stowage_cache_hit_total").increment(1);
            debug!("cache hit");
            return Ok(Cached {
                body,
                from_cache: true,
            });
        }
        counter!("stowage_cache_miss_total").increment(1);

        let body = fetch().await?;
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        if let Some(evicted) = self.kv.set(key.as_str(), body.clone(), ttl) {
            counter!("stowage_cache_evict_total").increment(1);
            debug!(evicted = %evicted, "evicted least recently used entry");
        }

        Ok(Cached {
            body,
            from_cache: false,
        })
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.kv.remove(key.as_str())
    }

    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let removed = self.kv.remove_prefix(prefix);
        debug!(prefix, removed, "invalidated cache prefix");
        removed
    }

    /// Drop every cached entity of `kind`, as after an edit to any one of them.
    pub fn invalidate_kind(&self, kind: EntityKind) -> usize {
        self.invalidate_prefix(&CacheKey::entity_prefix(&self.config.namespace, kind))
    }
}
