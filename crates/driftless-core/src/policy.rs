// ── Per-type reconcile policy ──
//
// How a collection is mutated differs per remote API and is never inferred.
// Each element type states its policy as an associated constant.

use std::fmt;

use crate::error::CoreError;
use crate::identity::Keyed;

/// Order of the two calls of an incremental update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOrder {
    /// Free slots or capacity first.
    RemoveThenAdd,
    /// Keep capacity net-positive until the additions landed.
    AddThenRemove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStyle {
    /// Separate `Add` and `Remove` calls.
    Incremental(ApplyOrder),
    /// One `Modify` call carrying the version token, additions and removals.
    Versioned,
    /// One `Replace` call carrying the whole desired collection.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryPolicy {
    /// No element is special.
    Unordered,
    /// The primary element cannot change in place; a change requires the
    /// parent to be replaced.
    Protected,
}

/// What to do with elements whose key matches but whose payload differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftPolicy {
    /// Leave them; report a warning.
    Ignore,
    /// Remove the observed element and add the desired one.
    Recreate,
}

/// How additions are grouped into calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Batching {
    /// All additions in one call.
    Whole,
    /// One call per element, in desired order, so the remote system assigns
    /// them in that order.
    OnePerCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    pub style: MutationStyle,
    pub primary: PrimaryPolicy,
    pub drift: DriftPolicy,
    pub batching: Batching,
}

impl ReconcilePolicy {
    pub const fn incremental(order: ApplyOrder) -> Self {
        Self {
            style: MutationStyle::Incremental(order),
            primary: PrimaryPolicy::Unordered,
            drift: DriftPolicy::Ignore,
            batching: Batching::Whole,
        }
    }

    pub const fn versioned() -> Self {
        Self {
            style: MutationStyle::Versioned,
            primary: PrimaryPolicy::Unordered,
            drift: DriftPolicy::Ignore,
            batching: Batching::Whole,
        }
    }

    pub const fn replace() -> Self {
        Self {
            style: MutationStyle::Replace,
            primary: PrimaryPolicy::Unordered,
            drift: DriftPolicy::Ignore,
            batching: Batching::Whole,
        }
    }

    pub const fn protect_primary(mut self) -> Self {
        self.primary = PrimaryPolicy::Protected;
        self
    }

    pub const fn recreate_drift(mut self) -> Self {
        self.drift = DriftPolicy::Recreate;
        self
    }

    pub const fn one_per_call(mut self) -> Self {
        self.batching = Batching::OnePerCall;
        self
    }
}

/// An element type the [`Reconciler`](crate::reconcile::Reconciler) can
/// converge.
pub trait Reconcilable: Keyed + Clone + PartialEq + fmt::Display + Send + Sync + 'static {
    const POLICY: ReconcilePolicy;

    /// Reject elements the remote API would refuse.
    fn validate(&self) -> Result<(), CoreError> {
        Ok(())
    }

    /// Whether this element is flagged as the collection's primary.
    fn is_primary(&self) -> bool {
        false
    }

    /// Whether this element can hold the primary slot at all. Ineligible
    /// elements are left out of primary detection on both sides.
    fn primary_eligible(&self) -> bool {
        true
    }

    /// Split remote or user elements into independently keyed units.
    fn expand(elements: Vec<Self>) -> Vec<Self> {
        elements
    }

    /// Regroup units into the shape the remote API accepts.
    fn collapse(elements: Vec<Self>) -> Vec<Self> {
        elements
    }
}
