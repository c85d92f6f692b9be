//! Cache key definitions.
//!
//! Entity keys follow the storefront's `{namespace}:{kind}:{canonical}`
//! layout so prefix invalidation can drop every entry of one kind. Request
//! keys hash the parts of a request that select a response.

use std::fmt;

use sha2::{Digest, Sha256};
use thiserror::Error;
use url::form_urlencoded;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("request path `{path}` must start with `/`")]
    InvalidPath { path: String },
}

/// Kinds of storefront entity with their own key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Page,
    Category,
    Attribute,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Page => "page",
            EntityKind::Category => "category",
            EntityKind::Attribute => "attribute",
        }
    }
}

/// A key in the shared key/value store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn entity(namespace: &str, kind: EntityKind, canonical: &str) -> Self {
        Self(format!("{namespace}:{}:{canonical}", kind.as_str()))
    }

    pub fn settings(namespace: &str) -> Self {
        Self(format!("{namespace}:settings"))
    }

    pub fn request(namespace: &str, fingerprint: &RequestFingerprint) -> Self {
        Self(format!("{namespace}:req:{}", fingerprint.to_hex()))
    }

    /// Prefix shared by every entity key of `kind`.
    pub fn entity_prefix(namespace: &str, kind: EntityKind) -> String {
        format!("{namespace}:{}:", kind.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 over the path, sorted query pairs and varying headers of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestFingerprint([u8; 32]);

impl RequestFingerprint {
    /// Fingerprint a request.
    ///
    /// Query pairs are decoded and sorted, so parameter order does not
    /// matter but repeated parameters do. Header names in `vary` are
    /// matched case-insensitively; a missing header hashes differently from
    /// an empty one.
    pub fn from_parts(
        path: &str,
        query: Option<&str>,
        headers: &[(&str, &str)],
        vary: &[String],
    ) -> Result<Self, CacheError> {
        if !path.starts_with('/') {
            return Err(CacheError::InvalidPath {
                path: path.to_string(),
            });
        }

        let mut pairs: Vec<(String, String)> = query
            .map(|query| {
                form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();
        pairs.sort();

        let mut hasher = Sha256::new();
        write_component(&mut hasher, b'p', path.as_bytes());
        for (name, value) in &pairs {
            write_component(&mut hasher, b'q', name.as_bytes());
            write_component(&mut hasher, b'v', value.as_bytes());
        }

        let mut vary: Vec<String> = vary.iter().map(|name| name.to_ascii_lowercase()).collect();
        vary.sort();
        vary.dedup();
        for name in &vary {
            write_component(&mut hasher, b'h', name.as_bytes());
            let value = headers
                .iter()
                .find(|(header, _)| header.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.trim());
            match value {
                Some(value) => write_component(&mut hasher, b'+', value.as_bytes()),
                None => write_component(&mut hasher, b'-', &[]),
            }
        }

        let mut digest = [0_u8; 32];
        digest.copy_from_slice(&hasher.finalize());
        Ok(Self(digest))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

fn write_component(hasher: &mut Sha256, tag: u8, bytes: &[u8]) {
    hasher.update([tag]);
    hasher.update((bytes.len() as u64).to_be_bytes());
    hasher.update(bytes);
}
