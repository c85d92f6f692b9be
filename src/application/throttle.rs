//! Leading-edge throttle with a single coalesced trailing invocation.
//!
//! The scheduler never reads a clock; every transition takes the current
//! instant from the caller so a paused tokio clock drives it deterministically.

use std::time::Duration;

use tokio::time::Instant;

/// Result of offering a payload to the throttle.
#[derive(Debug, PartialEq, Eq)]
pub enum Offer<T> {
    /// Run now with this payload.
    Fire(T),
    /// Held for the trailing invocation at `deadline`.
    Deferred { deadline: Instant, replaced: bool },
}

#[derive(Debug)]
pub struct Throttle<T> {
    interval: Duration,
    last_fire: Option<Instant>,
    pending: Option<T>,
    deadline: Option<Instant>,
}

impl<T> Throttle<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fire: None,
            pending: None,
            deadline: None,
        }
    }

    /// A throttle whose first window opens at `at`, as if it had fired then.
    pub fn primed(interval: Duration, at: Instant) -> Self {
        Self {
            last_fire: Some(at),
            ..Self::new(interval)
        }
    }

    /// When the pending trailing invocation comes due.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn offer(&mut self, payload: T, now: Instant) -> Offer<T> {
        if self.interval.is_zero() {
            return Offer::Fire(payload);
        }

        if let Some(deadline) = self.deadline {
            let replaced = self.pending.replace(payload).is_some();
            return Offer::Deferred { deadline, replaced };
        }

        match self.last_fire {
            Some(last) if now.saturating_duration_since(last) < self.interval => {
                let deadline = last + self.interval;
                self.pending = Some(payload);
                self.deadline = Some(deadline);
                Offer::Deferred {
                    deadline,
                    replaced: false,
                }
            }
            _ => {
                self.last_fire = Some(now);
                Offer::Fire(payload)
            }
        }
    }

    /// Release the trailing payload once its deadline has passed.
    pub fn fire_due(&mut self, now: Instant) -> Option<T> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                self.last_fire = Some(now);
                self.pending.take()
            }
            _ => None,
        }
    }

    /// Drain the trailing payload regardless of its deadline.
    pub fn take_pending(&mut self) -> Option<T> {
        self.deadline = None;
        self.pending.take()
    }
}
