//! String key/value storage backends used by the persistence engine.
//!
//! Every backend implements [`StorageAdapter`]. Which concrete backend a
//! container talks to is decided once, at attach time, by
//! [`StorageBackends::resolve`] under the current [`Environment`].

mod cookie;
mod web;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cookie::{Cookie, CookieJar, CookieStorage, MAX_COOKIE_BYTES, SameSite};
pub use web::{StorageArea, WebStorage};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{area} storage quota exceeded writing `{key}`: {needed} bytes needed, limit {limit}")]
    QuotaExceeded {
        area: &'static str,
        key: String,
        needed: u64,
        limit: u64,
    },
    #[error("storage io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage file `{path}` is corrupt: {reason}")]
    Corrupt { path: String, reason: String },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("invalid {area} key `{key}`: {reason}")]
    InvalidKey {
        area: &'static str,
        key: String,
        reason: &'static str,
    },
}

impl StorageError {
    pub(crate) fn corrupt(path: &Path, reason: impl std::fmt::Display) -> Self {
        Self::Corrupt {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Uniform access to a string key/value store.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

#[async_trait]
impl<T> StorageAdapter for Arc<T>
where
    T: StorageAdapter + ?Sized,
{
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.as_ref().get_item(key).await
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.as_ref().set_item(key, value).await
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.as_ref().remove_item(key).await
    }
}

/// Built-in backend names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    Session,
    Cookie,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Local => "local",
            StorageKind::Session => "session",
            StorageKind::Cookie => "cookie",
        }
    }
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution context deciding which backends are live.
///
/// A non-interactive context (rendering on behalf of a request rather than
/// in the user's own session) has no durable local or session area and may
/// only read cookies that arrived with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Environment {
    pub interactive: bool,
}

impl Environment {
    pub const fn interactive() -> Self {
        Self { interactive: true }
    }

    pub const fn non_interactive() -> Self {
        Self { interactive: false }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Adapter that stores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStorage;

#[async_trait]
impl StorageAdapter for NoopStorage {
    async fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    async fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Ok(())
    }

    async fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

/// The built-in backends shared by every container of one engine.
#[derive(Clone)]
pub struct StorageBackends {
    local: Arc<WebStorage>,
    session: Arc<WebStorage>,
    cookies: Arc<CookieJar>,
}

impl StorageBackends {
    pub fn new(local: WebStorage, session: WebStorage, cookies: CookieJar) -> Self {
        Self {
            local: Arc::new(local),
            session: Arc::new(session),
            cookies: Arc::new(cookies),
        }
    }

    /// Purely in-memory backends, each local and session area capped at `quota_bytes`.
    pub fn in_memory(quota_bytes: u64) -> Self {
        Self::new(
            WebStorage::local(quota_bytes),
            WebStorage::session(quota_bytes),
            CookieJar::new(),
        )
    }

    pub fn local(&self) -> &Arc<WebStorage> {
        &self.local
    }

    pub fn session(&self) -> &Arc<WebStorage> {
        &self.session
    }

    pub fn cookies(&self) -> &Arc<CookieJar> {
        &self.cookies
    }

    pub fn resolve(&self, kind: StorageKind, env: Environment) -> Arc<dyn StorageAdapter> {
        match (kind, env.interactive) {
            (StorageKind::Local, true) => self.local.clone(),
            (StorageKind::Session, true) => self.session.clone(),
            (StorageKind::Local | StorageKind::Session, false) => Arc::new(NoopStorage),
            (StorageKind::Cookie, true) => Arc::new(CookieStorage::writable(self.cookies.clone())),
            (StorageKind::Cookie, false) => {
                Arc::new(CookieStorage::read_only(self.cookies.clone()))
            }
        }
    }
}

impl Default for StorageBackends {
    fn default() -> Self {
        Self::in_memory(crate::config::DEFAULT_QUOTA_BYTES)
    }
}
