// ── Core error types ──
//
// Structured errors from the reconciliation engine. Callers never see HTTP
// statuses here: the `From<driftless_api::Error>` impl folds transport
// failures into domain variants, and anything without a domain meaning is
// carried verbatim in `Remote`.

use std::time::Duration;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Remote object errors ─────────────────────────────────────────
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Version conflict on {parent} persisted through {attempts} {operation} attempts")]
    VersionConflictExhausted {
        parent: String,
        operation: &'static str,
        attempts: u32,
    },

    #[error("Throttled by remote API")]
    Throttled { retry_after: Option<Duration> },

    /// Quota exceeded, malformed element, forbidden. Never retried.
    #[error("Permanent failure: {message}")]
    Permanent {
        code: Option<String>,
        message: String,
    },

    // ── Wait errors ──────────────────────────────────────────────────
    /// The remote operation's final state is unknown.
    #[error("Timed out after {elapsed:?} waiting for {id} (last state: {last_state})")]
    Timeout {
        id: String,
        elapsed: Duration,
        last_state: String,
    },

    #[error("{id} reached abort state {state}")]
    AbortState { id: String, state: String },

    #[error("{id} entered unexpected state {state} (expected one of {expected:?})")]
    UnexpectedState {
        id: String,
        state: String,
        expected: Vec<String>,
    },

    #[error("Wait for {id} cancelled after {polls} polls")]
    Cancelled { id: String, polls: u32 },

    // ── Reconciliation errors ────────────────────────────────────────
    /// The primary element of an ordered collection changed. The parent
    /// must be destroyed and recreated; no mutation was issued.
    #[error("Primary element of {parent} changed from {previous} to {desired}; parent must be replaced")]
    ReplacePrimary {
        parent: String,
        previous: String,
        desired: String,
    },

    /// Some sub-operations of a delta were applied before another failed.
    #[error("Partially applied changes to {parent}: completed {completed:?}, {failed} failed: {source}")]
    PartialApply {
        parent: String,
        completed: Vec<String>,
        failed: String,
        source: Box<CoreError>,
    },

    #[error("Conflicting elements share key {key} in desired collection")]
    DuplicateElement { key: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    // ── Wrapped remote errors ────────────────────────────────────────
    #[error(transparent)]
    Remote(driftless_api::Error),
}

impl CoreError {
    /// Returns `true` for errors that say nothing about the remote
    /// operation's final outcome.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Wrap a failure that interrupted a partially applied delta.
    pub(crate) fn partial(
        parent: &str,
        completed: Vec<String>,
        failed: impl Into<String>,
        source: CoreError,
    ) -> Self {
        if completed.is_empty() {
            return source;
        }
        Self::PartialApply {
            parent: parent.to_owned(),
            completed,
            failed: failed.into(),
            source: Box::new(source),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<driftless_api::Error> for CoreError {
    fn from(err: driftless_api::Error) -> Self {
        match err {
            driftless_api::Error::NotFound { resource } => CoreError::NotFound { resource },
            driftless_api::Error::Throttled { retry_after } => CoreError::Throttled { retry_after },
            driftless_api::Error::Rejected { code, message, .. } => {
                CoreError::Permanent { code, message }
            }
            other if other.is_not_found() => CoreError::NotFound {
                resource: other.to_string(),
            },
            other => CoreError::Remote(other),
        }
    }
}
