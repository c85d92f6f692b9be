use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::infra::storage::{StorageAdapter, StorageError};

/// Storage that records every write with the instant it happened.
#[derive(Default)]
pub(crate) struct RecordingStorage {
    value: Mutex<Option<String>>,
    writes: Mutex<Vec<(Instant, String)>>,
}

impl RecordingStorage {
    pub(crate) fn seeded(value: &str) -> Self {
        Self {
            value: Mutex::new(Some(value.to_string())),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn writes(&self) -> Vec<(Instant, String)> {
        self.writes.lock().expect("writes lock").clone()
    }
}

#[async_trait]
impl StorageAdapter for RecordingStorage {
    async fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.value.lock().expect("value lock").clone())
    }

    async fn set_item(&self, _key: &str, value: &str) -> Result<(), StorageError> {
        self.writes
            .lock()
            .expect("writes lock")
            .push((Instant::now(), value.to_string()));
        *self.value.lock().expect("value lock") = Some(value.to_string());
        Ok(())
    }

    async fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
        *self.value.lock().expect("value lock") = None;
        Ok(())
    }
}
