// driftless-core: reconciliation engine between desired state and remote collections.

pub mod backoff;
pub mod config;
pub mod diff;
pub mod error;
pub mod identity;
pub mod lock;
pub mod model;
pub mod policy;
pub mod reconcile;
pub mod waiter;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{BackoffConfig, ReconcileConfig, WaitConfig};
pub use diff::{Delta, PrimaryChange, dedupe, diff, primary_change};
pub use error::CoreError;
pub use identity::{FieldWriter, IdentityHasher, Keyed, SyntheticKey};
pub use lock::{LockTable, ScopeGuard};
pub use policy::{
    ApplyOrder, Batching, DriftPolicy, MutationStyle, PrimaryPolicy, ReconcilePolicy,
    Reconcilable,
};
pub use reconcile::{AppliedChanges, Reconciled, Reconciler};
pub use waiter::{
    AbsentPolicy, WaitOutcome, WaitSpec, Waiter, lifecycle_created, lifecycle_deleted,
    lifecycle_modified,
};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    AddressKind, FleetState, InterfaceAddress, PrefixListEntry, Protocol, RuleDirection,
    RuleSource, SecurityGroupRule, SpotFleetRequestState,
};
