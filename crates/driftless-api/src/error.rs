use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `driftless-api` crate.
///
/// Every remote failure is classified into one of a small set of kinds
/// (not-found, throttled, version conflict, duplicate, permanent rejection,
/// generic API failure) so the engine can decide between retrying,
/// re-reading, and surfacing. `driftless-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Classified remote failures ──────────────────────────────────
    /// The parent object or sub-object does not exist remotely.
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// The remote API throttled the request. Includes the server's
    /// retry hint when one was supplied.
    #[error("Throttled by remote API")]
    Throttled { retry_after: Option<Duration> },

    /// Optimistic-concurrency check failed: the version token supplied with
    /// a mutation no longer matches the remote collection.
    #[error("Version conflict on {resource}: {message}")]
    Conflict { resource: String, message: String },

    /// A conditional request's precondition did not hold.
    #[error("Precondition failed on {resource}: {message}")]
    PreconditionFailed { resource: String, message: String },

    /// The element being added already exists remotely.
    #[error("Duplicate element on {resource}: {message}")]
    Duplicate { resource: String, message: String },

    /// Permanent rejection (quota exceeded, malformed element, forbidden).
    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Any other unsuccessful remote response.
    #[error("Remote API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the remote object (or sub-object) is absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            _ => false,
        }
    }

    /// Returns `true` if the remote API asked us to slow down.
    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled { .. })
    }

    /// Returns `true` if the failure was an optimistic-concurrency mismatch.
    ///
    /// Both explicit conflicts and failed preconditions (stale `If-Match`)
    /// mean the same thing to the caller: re-read and recompute.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::PreconditionFailed { .. })
    }

    /// Returns `true` if an add was refused because the element exists.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Returns `true` if this is a transient error worth retrying on a
    /// read path. Mutations are never blindly retried on these.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Throttled { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// The server-supplied retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Extract the API error code, if available.
    pub fn api_error_code(&self) -> Option<&str> {
        match self {
            Self::Rejected { code, .. } | Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
