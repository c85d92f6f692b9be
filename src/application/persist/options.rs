use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::infra::storage::{StorageAdapter, StorageKind};

/// Prefix of the storage key used when a container does not name one.
pub const DEFAULT_KEY_PREFIX: &str = "pinia";

/// Where a container's state is written.
#[derive(Clone)]
pub enum StorageChoice {
    Builtin(StorageKind),
    Custom(Arc<dyn StorageAdapter>),
}

impl Default for StorageChoice {
    fn default() -> Self {
        Self::Builtin(StorageKind::default())
    }
}

impl From<StorageKind> for StorageChoice {
    fn from(kind: StorageKind) -> Self {
        Self::Builtin(kind)
    }
}

impl fmt::Debug for StorageChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageChoice::Builtin(kind) => write!(f, "Builtin({kind})"),
            StorageChoice::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Per-container persistence options.
///
/// `PersistOptions::default()` persists the whole snapshot to local storage
/// under `pinia:{id}`, unthrottled and in plaintext.
#[derive(Debug, Clone, Default)]
pub struct PersistOptions {
    pub key: Option<String>,
    pub storage: StorageChoice,
    pub paths: Option<Vec<String>>,
    pub throttle_ms: Option<u64>,
    pub encrypt: bool,
}

impl PersistOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn storage(mut self, kind: StorageKind) -> Self {
        self.storage = StorageChoice::Builtin(kind);
        self
    }

    pub fn custom_storage(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.storage = StorageChoice::Custom(adapter);
        self
    }

    pub fn paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn throttle_ms(mut self, millis: u64) -> Self {
        self.throttle_ms = Some(millis);
        self
    }

    pub fn encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    pub fn resolved_key(&self, container_id: &str) -> String {
        match &self.key {
            Some(key) => key.clone(),
            None => format!("{DEFAULT_KEY_PREFIX}:{container_id}"),
        }
    }

    /// `None` when writes are not throttled.
    pub fn throttle_interval(&self) -> Option<Duration> {
        self.throttle_ms
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis)
    }

    /// Selected paths, or `None` when the whole snapshot is persisted.
    pub(crate) fn selected_paths(&self) -> Option<Vec<String>> {
        self.paths.clone().filter(|paths| !paths.is_empty())
    }
}
