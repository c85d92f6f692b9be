//! Local and session storage areas.
//!
//! Both areas are origin-scoped string maps with a byte quota. A local area
//! may be mirrored to a JSON file so values outlive the process; session
//! areas live only as long as the value itself.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::util::bytes::{entry_size, format_bytes};

use super::{StorageAdapter, StorageError};

/// Which browser-style area a [`WebStorage`] models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageArea {
    Local,
    Session,
}

impl StorageArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageArea::Local => "local",
            StorageArea::Session => "session",
        }
    }
}

struct FileMirror {
    path: PathBuf,
    flush: AsyncMutex<()>,
}

pub struct WebStorage {
    area: StorageArea,
    entries: DashMap<String, String>,
    quota_bytes: u64,
    mirror: Option<FileMirror>,
}

impl std::fmt::Debug for WebStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebStorage")
            .field("area", &self.area)
            .field("quota_bytes", &self.quota_bytes)
            .field("mirror", &self.mirror.as_ref().map(|m| &m.path))
            .finish_non_exhaustive()
    }
}

impl WebStorage {
    pub fn local(quota_bytes: u64) -> Self {
        Self::in_memory(StorageArea::Local, quota_bytes)
    }

    pub fn session(quota_bytes: u64) -> Self {
        Self::in_memory(StorageArea::Session, quota_bytes)
    }

    fn in_memory(area: StorageArea, quota_bytes: u64) -> Self {
        Self {
            area,
            entries: DashMap::new(),
            quota_bytes,
            mirror: None,
        }
    }

    /// Open a local area backed by `path`, loading any entries already on disk.
    pub async fn open_local_file(
        path: impl Into<PathBuf>,
        quota_bytes: u64,
    ) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = DashMap::new();

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => {}
            Ok(contents) => {
                let stored: BTreeMap<String, String> = serde_json::from_str(&contents)
                    .map_err(|err| StorageError::corrupt(&path, err))?;
                for (key, value) in stored {
                    entries.insert(key, value);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::Io(err)),
        }

        debug!(path = %path.display(), entries = entries.len(), "opened local storage file");

        Ok(Self {
            area: StorageArea::Local,
            entries,
            quota_bytes,
            mirror: Some(FileMirror {
                path,
                flush: AsyncMutex::new(()),
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes currently counted against the quota.
    pub fn used_bytes(&self) -> u64 {
        self.entries
            .iter()
            .map(|entry| entry_size(entry.key(), entry.value()))
            .sum()
    }

    /// Sorted copy of every entry.
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn check_quota(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let others: u64 = self
            .entries
            .iter()
            .filter(|entry| entry.key() != key)
            .map(|entry| entry_size(entry.key(), entry.value()))
            .sum();
        let needed = others + entry_size(key, value);
        if needed > self.quota_bytes {
            warn!(
                area = self.area.as_str(),
                key,
                needed = %format_bytes(needed),
                quota = %format_bytes(self.quota_bytes),
                "storage quota exceeded"
            );
            return Err(StorageError::QuotaExceeded {
                area: self.area.as_str(),
                key: key.to_string(),
                needed,
                limit: self.quota_bytes,
            });
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let Some(mirror) = self.mirror.as_ref() else {
            return Ok(());
        };

        // Snapshot under the flush lock so the last flush always writes the newest map.
        let _guard = mirror.flush.lock().await;
        let contents = serde_json::to_vec_pretty(&self.entries())
            .map_err(|err| StorageError::corrupt(&mirror.path, err))?;
        let path = mirror.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &contents))
            .await
            .map_err(|err| StorageError::Unavailable(format!("flush task failed: {err}")))??;
        Ok(())
    }
}

impl WebStorage {
    /// Undo an in-memory change whose flush to disk failed.
    fn roll_back(&self, key: &str, previous: Option<String>) {
        warn!(area = self.area.as_str(), key, "storage file not updated; change rolled back");
        match previous {
            Some(value) => {
                self.entries.insert(key.to_string(), value);
            }
            None => {
                self.entries.remove(key);
            }
        }
    }
}

fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&directory)?;

    let mut staged = tempfile::NamedTempFile::new_in(&directory)?;
    staged.write_all(contents)?;
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .map_err(|err| StorageError::Io(err.error))?;
    Ok(())
}

#[async_trait]
impl StorageAdapter for WebStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).map(|value| value.clone()))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_quota(key, value)?;
        let previous = self.entries.insert(key.to_string(), value.to_string());
        if let Err(err) = self.flush().await {
            self.roll_back(key, previous);
            return Err(err);
        }
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let Some((_, previous)) = self.entries.remove(key) else {
            return Ok(());
        };
        if let Err(err) = self.flush().await {
            self.roll_back(key, Some(previous));
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_after_set_returns_value_for_both_areas() {
        for storage in [WebStorage::local(1024), WebStorage::session(1024)] {
            assert_eq!(storage.get_item("pinia:cart").await.expect("get"), None);
            storage.set_item("pinia:cart", "{\"items\":[]}").await.expect("set");
            assert_eq!(
                storage.get_item("pinia:cart").await.expect("get").as_deref(),
                Some("{\"items\":[]}")
            );
            storage.remove_item("pinia:cart").await.expect("remove");
            assert_eq!(storage.get_item("pinia:cart").await.expect("get"), None);
        }
    }

    #[tokio::test]
    async fn quota_rejects_oversized_write_and_keeps_previous_value() {
        let storage = WebStorage::session(16);
        storage.set_item("k", "small").await.expect("fits");

        let err = storage
            .set_item("k", "this value is far too long")
            .await
            .expect_err("quota exceeded");

        assert!(matches!(err, StorageError::QuotaExceeded { limit: 16, .. }));
        assert_eq!(storage.get_item("k").await.expect("get").as_deref(), Some("small"));
    }

    #[tokio::test]
    async fn overwriting_a_key_does_not_double_count_it() {
        let storage = WebStorage::local(10);
        storage.set_item("k", "12345678").await.expect("first write");
        storage.set_item("k", "87654321").await.expect("overwrite fits");
        assert_eq!(storage.used_bytes(), 9);
    }

    #[tokio::test]
    async fn file_backed_local_storage_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("local.json");

        let storage = WebStorage::open_local_file(&path, 4096).await.expect("open");
        storage.set_item("history", "[\"rust\"]").await.expect("set");
        storage.set_item("scratch", "x").await.expect("set");
        storage.remove_item("scratch").await.expect("remove");
        drop(storage);

        let reopened = WebStorage::open_local_file(&path, 4096).await.expect("reopen");
        assert_eq!(reopened.len(), 1);
        assert_eq!(
            reopened.get_item("history").await.expect("get").as_deref(),
            Some("[\"rust\"]")
        );
    }

    #[tokio::test]
    async fn failed_flush_leaves_memory_matching_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let parent = dir.path().join("blocked");
        let path = parent.join("local.json");

        let storage = WebStorage::open_local_file(&path, 4096).await.expect("open");
        storage.set_item("k", "v1").await.expect("first write");

        // A regular file where the directory should be makes every flush fail.
        std::fs::remove_dir_all(&parent).expect("remove dir");
        std::fs::write(&parent, "not a directory").expect("block dir");

        storage.set_item("k", "v2").await.expect_err("flush fails");
        assert_eq!(storage.get_item("k").await.expect("get").as_deref(), Some("v1"));

        storage.set_item("fresh", "x").await.expect_err("flush fails");
        assert_eq!(storage.get_item("fresh").await.expect("get"), None);
        assert_eq!(storage.used_bytes(), 3);

        storage.remove_item("k").await.expect_err("flush fails");
        assert_eq!(storage.get_item("k").await.expect("get").as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn corrupt_storage_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("local.json");
        tokio::fs::write(&path, "{not json").await.expect("write");

        let err = WebStorage::open_local_file(&path, 4096)
            .await
            .err()
            .expect("corrupt file rejected");
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }
}
