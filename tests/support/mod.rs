#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};
use stowage::domain::container::Store;
use stowage::domain::snapshot::StateSnapshot;
use stowage::infra::storage::{StorageAdapter, StorageError};
use tokio::time::Instant;

/// Adapter that remembers every write and when it happened.
#[derive(Default)]
pub struct RecordingStorage {
    value: Mutex<Option<String>>,
    writes: Mutex<Vec<(Instant, String)>>,
}

impl RecordingStorage {
    pub fn seeded(value: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(Some(value.into())),
            writes: Mutex::new(Vec::new()),
        })
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn writes(&self) -> Vec<(Instant, String)> {
        self.writes.lock().expect("writes lock").clone()
    }

    pub fn current(&self) -> Option<String> {
        self.value.lock().expect("value lock").clone()
    }
}

#[async_trait]
impl StorageAdapter for RecordingStorage {
    async fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.current())
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

/// Build a store from a JSON object literal.
pub fn store(id: &str, defaults: Value) -> Arc<Store> {
    let defaults: StateSnapshot = match defaults {
        Value::Object(map) => map,
        other => panic!("defaults must be an object, got {other}"),
    };
    Arc::new(Store::new(id, defaults))
}

pub fn empty_store(id: &str) -> Arc<Store> {
    store(id, json!({}))
}

pub fn parse(payload: &str) -> Value {
    serde_json::from_str(payload).expect("payload is json")
}
