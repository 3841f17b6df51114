// ── Remote client boundary ──
//
// The engine never talks HTTP. It talks to these two traits, which any
// transport (the bundled `HttpCollectionClient`, a cloud SDK wrapper, or
// an in-memory test double) can implement.

use std::future::Future;

use crate::error::Error;
use crate::types::{LifecycleState, Mutation, Observed, VersionToken};

/// Polls the state of a single remote object.
///
/// Absence must be reported as an error for which
/// [`Error::is_not_found`] returns `true`; the waiter decides whether
/// absence means success (deletion) or an eventual-consistency gap
/// (creation).
pub trait StatePoller: Send + Sync {
    /// The state vocabulary of the polled object.
    type State: Clone + PartialEq + std::fmt::Debug + std::fmt::Display + Send + Sync;

    fn poll_state(&self, id: &str) -> impl Future<Output = Result<Self::State, Error>> + Send;
}

/// Reads and mutates a multi-valued attribute of a remote parent object.
///
/// Implementations issue exactly one remote request per call. Transport
/// level retries (connection resets and the like) are theirs to handle;
/// classification of the final failure is what the engine consumes.
pub trait CollectionClient<E>: StatePoller<State = LifecycleState>
where
    E: Send + Sync,
{
    /// Read the current collection of `parent`, with its version token.
    fn read(&self, parent: &str) -> impl Future<Output = Result<Observed<E>, Error>> + Send;

    /// Issue a single mutating call against `parent`.
    ///
    /// Returns the version token the collection moved to, when the remote
    /// API reports one. `None` from a versioned collection means the caller
    /// must re-read before its next conditional write.
    fn mutate(
        &self,
        parent: &str,
        mutation: Mutation<E>,
    ) -> impl Future<Output = Result<Option<VersionToken>, Error>> + Send;
}
