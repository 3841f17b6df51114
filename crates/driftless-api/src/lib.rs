//! Remote client boundary for the driftless reconciliation engine.
//!
//! The engine in `driftless-core` consumes remote collections exclusively
//! through the traits defined here:
//!
//! - **[`CollectionClient<E>`]**: `read` a parent's multi-valued attribute
//!   (with its optimistic-concurrency [`VersionToken`]) and issue a single
//!   [`Mutation`] against it.
//! - **[`StatePoller`]**: poll the lifecycle state of one remote object,
//!   reporting absence as a not-found [`Error`].
//!
//! Every failure is classified ([`Error::is_not_found`],
//! [`Error::is_throttled`], [`Error::is_version_conflict`],
//! [`Error::is_duplicate`]) so the engine can choose between retrying,
//! re-reading and surfacing without inspecting transport details.
//!
//! [`HttpCollectionClient`] is a reference implementation speaking a small
//! JSON convention over `reqwest`.

pub mod client;
pub mod error;
pub mod http;
pub mod transport;
pub mod types;

pub use client::{CollectionClient, StatePoller};
pub use error::Error;
pub use http::HttpCollectionClient;
pub use transport::{TlsMode, TransportConfig};
pub use types::{LifecycleState, Mutation, Observed, VersionToken};
