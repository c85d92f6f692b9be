use crate::application::error::HydrateError;

/// Lifecycle of one attached container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistPhase {
    Uninitialized,
    Hydrating,
    Idle,
    Writing,
    Disposed,
}

impl PersistPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistPhase::Uninitialized => "uninitialized",
            PersistPhase::Hydrating => "hydrating",
            PersistPhase::Idle => "idle",
            PersistPhase::Writing => "writing",
            PersistPhase::Disposed => "disposed",
        }
    }
}

/// What hydration did to the container.
#[derive(Debug)]
pub enum HydrateOutcome {
    /// Nothing stored under the key; the container keeps its defaults.
    Missing,
    /// These top-level fields were overwritten from storage.
    Restored { fields: Vec<String> },
    /// Stored data could not be used; the container keeps its defaults.
    Failed(HydrateError),
}

impl HydrateOutcome {
    /// Metric and log label.
    pub fn label(&self) -> &'static str {
        match self {
            HydrateOutcome::Missing => "missing",
            HydrateOutcome::Restored { .. } => "restored",
            HydrateOutcome::Failed(err) if err.is_authentication_failure() => "rejected",
            HydrateOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_restored(&self) -> bool {
        matches!(self, HydrateOutcome::Restored { .. })
    }

    pub fn error(&self) -> Option<&HydrateError> {
        match self {
            HydrateOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}
