//! State container host contract and an in-process implementation.
//!
//! The persistence engine needs a handful of capabilities from a host: an
//! identifier, a snapshot of the current top-level fields, ways to
//! overwrite fields in place with or without notifying subscribers, and a
//! mutation subscription. [`Store`] is a
//! plain `RwLock`-backed host used by the binary and the tests.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::util::lock::{mutex_lock, rw_read, rw_write};

use super::error::DomainError;
use super::snapshot::{StateSnapshot, merge_into};

const SOURCE: &str = "domain::container";

/// Callback invoked with the full snapshot after every mutation.
pub type Listener = Arc<dyn Fn(&StateSnapshot) + Send + Sync>;

/// Capabilities the engine requires from a state container.
pub trait StateContainer: Send + Sync {
    /// Stable identifier, used to derive the default storage key.
    fn id(&self) -> &str;

    /// Current value of every top-level field.
    fn snapshot(&self) -> StateSnapshot;

    /// Overwrite the given top-level fields in place, leaving the rest untouched.
    fn merge(&self, fields: StateSnapshot);

    /// Overwrite the given fields like [`StateContainer::merge`], without
    /// notifying subscribers. Mutations made concurrently through other
    /// paths must still notify as usual.
    fn restore(&self, fields: StateSnapshot);

    /// Register a mutation listener. Dropping or calling
    /// [`Subscription::unsubscribe`] on the handle detaches it.
    fn subscribe(&self, listener: Listener) -> Subscription;
}

/// Handle returned by [`StateContainer::subscribe`].
#[must_use = "dropping a subscription detaches the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Detach the listener. Notifications already delivered are unaffected.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

type ListenerTable = Arc<Mutex<Vec<(u64, Listener)>>>;

/// In-process state container.
///
/// Mutations are serialized through a notify gate so listeners observe
/// snapshots in mutation order. Listeners may read the store but must not
/// mutate it re-entrantly.
pub struct Store {
    id: String,
    state: RwLock<StateSnapshot>,
    listeners: ListenerTable,
    next_listener: AtomicU64,
    notify_gate: Mutex<()>,
}

impl Store {
    /// Create a store with the given default state.
    pub fn new(id: impl Into<String>, defaults: StateSnapshot) -> Self {
        Self {
            id: id.into(),
            state: RwLock::new(defaults),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener: AtomicU64::new(0),
            notify_gate: Mutex::new(()),
        }
    }

    /// Create a store whose defaults come from a serializable value.
    ///
    /// The value must serialize to a JSON object.
    pub fn from_value<T: Serialize>(id: impl Into<String>, defaults: &T) -> Result<Self, DomainError> {
        match serde_json::to_value(defaults) {
            Ok(Value::Object(map)) => Ok(Self::new(id, map)),
            Ok(other) => Err(DomainError::validation(format!(
                "store defaults must be an object, got {}",
                json_kind(&other)
            ))),
            Err(err) => Err(DomainError::validation(format!(
                "store defaults are not serializable: {err}"
            ))),
        }
    }

    /// Read one top-level field.
    pub fn get(&self, field: &str) -> Option<Value> {
        rw_read(&self.state, SOURCE, "get").get(field).cloned()
    }

    /// Set one top-level field and notify listeners.
    pub fn set(&self, field: impl Into<String>, value: Value) {
        let field = field.into();
        self.mutate(move |state| {
            state.insert(field, value);
        });
    }

    /// Apply an arbitrary mutation and notify listeners with the resulting snapshot.
    pub fn mutate<F>(&self, mutation: F)
    where
        F: FnOnce(&mut StateSnapshot),
    {
        let _gate = mutex_lock(&self.notify_gate, SOURCE, "mutate.gate");
        let snapshot = {
            let mut state = rw_write(&self.state, SOURCE, "mutate");
            mutation(&mut state);
            state.clone()
        };
        self.notify(&snapshot);
    }

    /// Deserialize the current state into a typed value.
    pub fn state_as<T: DeserializeOwned>(&self) -> Result<T, DomainError> {
        let snapshot = self.snapshot();
        serde_json::from_value(Value::Object(snapshot))
            .map_err(|err| DomainError::validation(format!("store state does not fit type: {err}")))
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        mutex_lock(&self.listeners, SOURCE, "listener_count").len()
    }

    fn notify(&self, snapshot: &StateSnapshot) {
        let listeners: Vec<Listener> = mutex_lock(&self.listeners, SOURCE, "notify")
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }
}

impl StateContainer for Store {
    fn id(&self) -> &str {
        &self.id
    }

    fn snapshot(&self) -> StateSnapshot {
        rw_read(&self.state, SOURCE, "snapshot").clone()
    }

    fn merge(&self, fields: StateSnapshot) {
        self.mutate(move |state| {
            merge_into(state, fields);
        });
    }

    fn restore(&self, fields: StateSnapshot) {
        let _gate = mutex_lock(&self.notify_gate, SOURCE, "restore.gate");
        merge_into(&mut rw_write(&self.state, SOURCE, "restore"), fields);
    }

    fn subscribe(&self, listener: Listener) -> Subscription {
        let token = self.next_listener.fetch_add(1, Ordering::Relaxed);
        mutex_lock(&self.listeners, SOURCE, "subscribe").push((token, listener));

        let listeners = Arc::clone(&self.listeners);
        Subscription::new(move || {
            mutex_lock(&listeners, SOURCE, "unsubscribe").retain(|(id, _)| *id != token);
        })
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
