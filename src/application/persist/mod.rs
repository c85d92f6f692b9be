//! Persistence orchestrator.
//!
//! [`PersistEngine::attach`] wires a container to a storage backend: the
//! stored value is restored into the container, then every mutation is
//! projected, serialized, optionally sealed and written back, subject to
//! the container's throttle. Each attachment owns one worker task, so the
//! writes of a container are applied in mutation order.

mod options;
mod outcome;
mod worker;

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::application::error::PersistError;
use crate::application::throttle::Throttle;
use crate::config::PersistSettings;
use crate::domain::container::{Listener, StateContainer, Subscription};
use crate::domain::snapshot::StateSnapshot;
use crate::infra::crypto::Codec;
use crate::infra::storage::{
    CookieJar, Environment, StorageAdapter, StorageBackends, StorageError, StorageKind, WebStorage,
};

pub use options::{DEFAULT_KEY_PREFIX, PersistOptions, StorageChoice};
pub use outcome::{HydrateOutcome, PersistPhase};

use worker::Worker;

/// Shared configuration for every container attached through it.
#[derive(Clone)]
pub struct PersistEngine {
    secret: Arc<str>,
    backends: StorageBackends,
    environment: Environment,
    codec: Arc<Codec>,
}

impl PersistEngine {
    pub fn builder() -> PersistEngineBuilder {
        PersistEngineBuilder::default()
    }

    /// Build an engine from loaded settings, opening the local storage file if one is configured.
    pub async fn from_settings(
        settings: &PersistSettings,
        cookies: CookieJar,
    ) -> Result<Self, PersistError> {
        let local = match &settings.storage_file {
            Some(path) => WebStorage::open_local_file(path, settings.quota_bytes).await?,
            None => WebStorage::local(settings.quota_bytes),
        };
        let backends =
            StorageBackends::new(local, WebStorage::session(settings.quota_bytes), cookies);

        let mut builder = Self::builder().backends(backends).environment(Environment {
            interactive: settings.interactive,
        });
        if let Some(secret) = &settings.secret {
            builder = builder.secret(secret.clone());
        }
        Ok(builder.build())
    }

    pub fn backends(&self) -> &StorageBackends {
        &self.backends
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn codec(&self) -> &Arc<Codec> {
        &self.codec
    }

    pub fn has_secret(&self) -> bool {
        !self.secret.is_empty()
    }

    /// Adapter a container configured with `choice` talks to under this engine's environment.
    pub fn resolve_storage(&self, choice: &StorageChoice) -> Arc<dyn StorageAdapter> {
        match choice {
            StorageChoice::Builtin(kind) => self.backends.resolve(*kind, self.environment),
            StorageChoice::Custom(adapter) => Arc::clone(adapter),
        }
    }

    /// Start persisting `container`.
    ///
    /// Must be called from within a tokio runtime. The container is usable
    /// immediately; hydration runs on the attachment's worker before any
    /// write. Dropping the returned handle disposes the attachment.
    pub fn attach<C>(
        &self,
        container: Arc<C>,
        options: PersistOptions,
    ) -> Result<PersistHandle, PersistError>
    where
        C: StateContainer + 'static,
    {
        let container: Arc<dyn StateContainer> = container;
        let key = options.resolved_key(container.id());
        if key.is_empty() {
            return Err(PersistError::EmptyKey {
                container: container.id().to_string(),
            });
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PersistError::NoRuntime)?;

        if options.encrypt && !self.has_secret() {
            warn!(
                key = %key,
                container = container.id(),
                "encryption requested without a secret; writes will fail until one is configured"
            );
        }

        let adapter = self.resolve_storage(&options.storage);
        let throttle = options
            .throttle_interval()
            .map(|interval| Throttle::primed(interval, Instant::now()));

        let (sender, receiver) = mpsc::unbounded_channel::<StateSnapshot>();
        let listener: Listener = Arc::new(move |snapshot: &StateSnapshot| {
            // A closed channel means the worker is gone; the mutation itself still succeeds.
            let _ = sender.send(snapshot.clone());
        });
        let subscription = container.subscribe(listener);

        let (phase_tx, phase_rx) = watch::channel(PersistPhase::Uninitialized);
        let (hydration_tx, hydration_rx) = watch::channel(None);

        debug!(
            key = %key,
            container = container.id(),
            storage = ?options.storage,
            throttled = throttle.is_some(),
            encrypt = options.encrypt,
            "attached container"
        );

        let worker = Worker {
            container,
            key: key.clone(),
            adapter,
            paths: options.selected_paths(),
            encrypt: options.encrypt,
            secret: Arc::clone(&self.secret),
            codec: Arc::clone(&self.codec),
            throttle,
            phase: phase_tx,
            hydration: hydration_tx,
        };
        runtime.spawn(worker.run(receiver));

        Ok(PersistHandle {
            key,
            subscription: Some(subscription),
            phase: phase_rx,
            hydration: hydration_rx,
        })
    }

    /// Remove whatever is stored under `key` in a built-in backend.
    pub async fn purge(&self, key: &str, kind: StorageKind) -> Result<(), StorageError> {
        self.backends
            .resolve(kind, self.environment)
            .remove_item(key)
            .await
    }
}

impl fmt::Debug for PersistEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistEngine")
            .field("has_secret", &self.has_secret())
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct PersistEngineBuilder {
    secret: Option<String>,
    backends: Option<StorageBackends>,
    environment: Environment,
    codec: Option<Arc<Codec>>,
}

impl PersistEngineBuilder {
    /// Secret used to derive the sealing key. An empty secret counts as none.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn backends(mut self, backends: StorageBackends) -> Self {
        self.backends = Some(backends);
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Share a codec (and its key cache) with other engines.
    pub fn codec(mut self, codec: Arc<Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn build(self) -> PersistEngine {
        PersistEngine {
            secret: Arc::from(self.secret.unwrap_or_default()),
            backends: self.backends.unwrap_or_default(),
            environment: self.environment,
            codec: self.codec.unwrap_or_default(),
        }
    }
}

/// One attached container.
#[must_use = "dropping the handle disposes the attachment"]
#[derive(Debug)]
pub struct PersistHandle {
    key: String,
    subscription: Option<Subscription>,
    phase: watch::Receiver<PersistPhase>,
    hydration: watch::Receiver<Option<Arc<HydrateOutcome>>>,
}

impl PersistHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn phase(&self) -> PersistPhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<PersistPhase> {
        self.phase.clone()
    }

    /// Wait for hydration to finish. `None` only if the worker stopped before hydrating.
    pub async fn hydrated(&self) -> Option<Arc<HydrateOutcome>> {
        let mut hydration = self.hydration.clone();
        hydration
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| outcome.clone())
    }

    /// Stop observing the container. A pending throttled write still lands.
    pub fn dispose(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            debug!(key = %self.key, "disposed persistence attachment");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.subscription.is_none()
    }

    /// Wait until the worker has written its last payload and stopped.
    pub async fn closed(&self) {
        let mut phase = self.phase.clone();
        let _ = phase
            .wait_for(|phase| *phase == PersistPhase::Disposed)
            .await;
    }
}
