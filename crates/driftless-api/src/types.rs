// ── Wire-neutral collection types ──
//
// These types describe what a remote collection looks like to the engine
// (elements plus an optional optimistic-concurrency token) and what a
// mutation carries. They are generic over the element type so the same
// client boundary serves security group rules, interface addresses and
// prefix-list entries alike.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ── VersionToken ────────────────────────────────────────────────────

/// Optimistic-concurrency counter returned by a read and echoed back on
/// the following write. A mismatch means another writer got there first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(pub u64);

impl VersionToken {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u64> for VersionToken {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

// ── Observed ────────────────────────────────────────────────────────

/// The remote collection as returned by a single read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observed<E> {
    /// Elements currently held by the remote parent.
    #[serde(rename = "entries", default = "Vec::new")]
    pub elements: Vec<E>,

    /// Version token, when the remote API exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionToken>,
}

impl<E> Observed<E> {
    pub fn new(elements: Vec<E>, version: Option<VersionToken>) -> Self {
        Self { elements, version }
    }

    /// An unversioned observation.
    pub fn unversioned(elements: Vec<E>) -> Self {
        Self {
            elements,
            version: None,
        }
    }
}

// ── Mutation ────────────────────────────────────────────────────────

/// A single mutating call against a remote collection.
///
/// Incremental APIs receive separate `Add` / `Remove` calls, versioned
/// modify APIs receive one `Modify`, and whole-collection APIs receive
/// `Replace` with the full desired contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation<E> {
    Add {
        version: Option<VersionToken>,
        elements: Vec<E>,
    },
    Remove {
        version: Option<VersionToken>,
        elements: Vec<E>,
    },
    Modify {
        version: Option<VersionToken>,
        add: Vec<E>,
        remove: Vec<E>,
    },
    Replace {
        version: Option<VersionToken>,
        elements: Vec<E>,
    },
}

impl<E> Mutation<E> {
    /// Short operation name for logs and error context.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Remove { .. } => "remove",
            Self::Modify { .. } => "modify",
            Self::Replace { .. } => "replace",
        }
    }

    /// The version token this mutation is conditioned on.
    pub fn version(&self) -> Option<VersionToken> {
        match self {
            Self::Add { version, .. }
            | Self::Remove { version, .. }
            | Self::Modify { version, .. }
            | Self::Replace { version, .. } => *version,
        }
    }

    /// Number of elements carried by the call.
    pub fn len(&self) -> usize {
        match self {
            Self::Add { elements, .. }
            | Self::Remove { elements, .. }
            | Self::Replace { elements, .. } => elements.len(),
            Self::Modify { add, remove, .. } => add.len() + remove.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── LifecycleState ──────────────────────────────────────────────────

/// Normalized state of a remote asynchronous operation.
///
/// Remote APIs spell these many ways (`active`, `create-complete`,
/// `modify-complete`, `in-use`...). Parsing is lenient and
/// case-insensitive; display always uses the canonical kebab-case name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    #[strum(to_string = "pending", serialize = "submitted", serialize = "create-in-progress")]
    #[serde(alias = "submitted", alias = "create-in-progress")]
    Pending,

    #[strum(to_string = "in-progress", serialize = "attaching", serialize = "detaching")]
    #[serde(alias = "attaching", alias = "detaching")]
    InProgress,

    #[strum(
        to_string = "available",
        serialize = "active",
        serialize = "create-complete",
        serialize = "modify-complete",
        serialize = "in-use",
        serialize = "attached"
    )]
    #[serde(
        alias = "active",
        alias = "create-complete",
        alias = "modify-complete",
        alias = "in-use",
        alias = "attached"
    )]
    Available,

    #[strum(to_string = "modifying", serialize = "modify-in-progress")]
    #[serde(alias = "modify-in-progress")]
    Modifying,

    #[strum(
        to_string = "failed",
        serialize = "create-failed",
        serialize = "modify-failed",
        serialize = "delete-failed"
    )]
    #[serde(alias = "create-failed", alias = "modify-failed", alias = "delete-failed")]
    Failed,

    #[strum(to_string = "deleting", serialize = "delete-in-progress")]
    #[serde(alias = "delete-in-progress")]
    Deleting,

    #[strum(to_string = "deleted", serialize = "delete-complete", serialize = "detached")]
    #[serde(alias = "delete-complete", alias = "detached")]
    Deleted,
}

impl LifecycleState {
    /// States from which the remote system will not move on its own.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Available | Self::Failed | Self::Deleted)
    }
}
