//! Per-container task: hydrate once, then write every forwarded snapshot.

use std::sync::Arc;

use metrics::counter;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use crate::application::error::{HydrateError, WriteError};
use crate::application::throttle::{Offer, Throttle};
use crate::domain::container::{StateContainer, json_kind};
use crate::domain::snapshot::{StateSnapshot, select};
use crate::infra::crypto::Codec;
use crate::infra::storage::StorageAdapter;

use super::outcome::{HydrateOutcome, PersistPhase};

pub(super) struct Worker {
    pub(super) container: Arc<dyn StateContainer>,
    pub(super) key: String,
    pub(super) adapter: Arc<dyn StorageAdapter>,
    pub(super) paths: Option<Vec<String>>,
    pub(super) encrypt: bool,
    pub(super) secret: Arc<str>,
    pub(super) codec: Arc<Codec>,
    pub(super) throttle: Option<Throttle<String>>,
    pub(super) phase: watch::Sender<PersistPhase>,
    pub(super) hydration: watch::Sender<Option<Arc<HydrateOutcome>>>,
}

impl Worker {
    pub(super) async fn run(mut self, mut notifications: mpsc::UnboundedReceiver<StateSnapshot>) {
        self.phase.send_replace(PersistPhase::Hydrating);
        let outcome = self.hydrate().await;
        self.report_hydration(&outcome);
        self.hydration.send_replace(Some(Arc::new(outcome)));
        self.phase.send_replace(PersistPhase::Idle);

        loop {
            let deadline = self.throttle.as_ref().and_then(Throttle::deadline);
            tokio::select! {
                received = notifications.recv() => match received {
                    Some(snapshot) => self.handle(snapshot).await,
                    None => break,
                },
                () = wait_until(deadline) => self.flush_due(Instant::now()).await,
            }
        }

        // Subscription gone and every queued snapshot handled; settle the trailing write.
        if let Some(deadline) = self.throttle.as_ref().and_then(Throttle::deadline) {
            sleep_until(deadline).await;
        }
        if let Some(payload) = self.throttle.as_mut().and_then(Throttle::take_pending) {
            self.write(payload).await;
        }

        debug!(key = %self.key, container = self.container.id(), "persistence worker stopped");
        self.phase.send_replace(PersistPhase::Disposed);
    }

    async fn hydrate(&self) -> HydrateOutcome {
        match self.restore().await {
            Ok(Some(fields)) => {
                let names = fields.keys().cloned().collect();
                self.container.restore(fields);
                HydrateOutcome::Restored { fields: names }
            }
            Ok(None) => HydrateOutcome::Missing,
            Err(err) => HydrateOutcome::Failed(err),
        }
    }

    async fn restore(&self) -> Result<Option<StateSnapshot>, HydrateError> {
        let raw = match self.adapter.get_item(&self.key).await? {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Ok(None),
        };

        let json = if self.encrypt {
            self.codec.decrypt(&raw, &self.secret)?
        } else {
            raw
        };

        match serde_json::from_str::<Value>(&json)? {
            Value::Object(fields) => Ok(Some(fields)),
            other => Err(HydrateError::NotAnObject {
                found: json_kind(&other),
            }),
        }
    }

    fn report_hydration(&self, outcome: &HydrateOutcome) {
        let container = self.container.id();
        match outcome {
            HydrateOutcome::Missing => {
                debug!(key = %self.key, container, outcome = outcome.label(), "no persisted state");
            }
            HydrateOutcome::Restored { fields } => {
                info!(
                    key = %self.key,
                    container,
                    outcome = outcome.label(),
                    fields = fields.len(),
                    "restored persisted state"
                );
            }
            HydrateOutcome::Failed(err) => {
                warn!(
                    key = %self.key,
                    container,
                    outcome = outcome.label(),
                    authentication = err.is_authentication_failure(),
                    error = %err,
                    "ignoring persisted state"
                );
            }
        }
        counter!("stowage_persist_hydrate_total", "outcome" => outcome.label()).increment(1);
    }

    async fn handle(&mut self, snapshot: StateSnapshot) {
        let now = Instant::now();
        self.flush_due(now).await;

        let payload = match self.encode(&snapshot) {
            Ok(payload) => payload,
            Err(err) => {
                self.record_failure(&err);
                return;
            }
        };

        let offer = match self.throttle.as_mut() {
            Some(throttle) => throttle.offer(payload, now),
            None => Offer::Fire(payload),
        };
        match offer {
            Offer::Fire(payload) => self.write(payload).await,
            Offer::Deferred { deadline, replaced } => {
                if replaced {
                    counter!("stowage_persist_coalesced_total").increment(1);
                }
                debug!(
                    key = %self.key,
                    due_in_ms = deadline.saturating_duration_since(now).as_millis() as u64,
                    "write deferred by throttle"
                );
            }
        }
    }

    async fn flush_due(&mut self, now: Instant) {
        if let Some(payload) = self.throttle.as_mut().and_then(|t| t.fire_due(now)) {
            self.write(payload).await;
        }
    }

    fn encode(&self, snapshot: &StateSnapshot) -> Result<String, WriteError> {
        let picked = select(snapshot, self.paths.as_deref());
        let json = serde_json::to_string(&picked)?;
        if self.encrypt {
            Ok(self.codec.encrypt(&json, &self.secret)?)
        } else {
            Ok(json)
        }
    }

    async fn write(&self, payload: String) {
        self.phase.send_replace(PersistPhase::Writing);
        match self.adapter.set_item(&self.key, &payload).await {
            Ok(()) => {
                counter!("stowage_persist_write_total").increment(1);
                debug!(key = %self.key, bytes = payload.len(), "persisted state");
            }
            Err(err) => self.record_failure(&WriteError::from(err)),
        }
        self.phase.send_replace(PersistPhase::Idle);
    }

    fn record_failure(&self, err: &WriteError) {
        counter!("stowage_persist_write_failed_total").increment(1);
        warn!(
            key = %self.key,
            container = self.container.id(),
            error = %err,
            "abandoned persisted state write"
        );
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
