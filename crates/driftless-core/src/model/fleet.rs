// ── Fleet lifecycles ──
//
// Fleets and spot fleet requests are awaited directly rather than
// reconciled as collections. Their state vocabularies differ from the
// generic lifecycle, so they carry their own wait presets.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::waiter::{AbsentPolicy, WaitSpec};

/// Initial delay before polling a fleet that is terminating its instances.
pub const TERMINATION_DELAY: Duration = Duration::from_secs(300);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum FleetState {
    Submitted,
    Active,
    Modifying,
    DeletedRunning,
    DeletedTerminating,
    Deleted,
    Failed,
}

impl FleetState {
    /// Wait for a new fleet. A `request` fleet can be fulfilled and deleted
    /// before the first poll, so the deleted states also count.
    pub fn created(request_type: bool) -> WaitSpec<Self> {
        let mut target = vec![Self::Active];
        if request_type {
            target.extend([Self::Deleted, Self::DeletedRunning, Self::DeletedTerminating]);
        }
        WaitSpec::new(target)
            .pending([Self::Submitted])
            .abort([Self::Failed])
            .absent(AbsentPolicy::RetryThenFail)
    }

    pub fn modified() -> WaitSpec<Self> {
        WaitSpec::new([Self::Active])
            .pending([Self::Modifying])
            .abort([Self::Failed])
    }

    /// Wait for deletion. Without instance termination the fleet settles in
    /// `deleted_running`; with it, poll after [`TERMINATION_DELAY`].
    pub fn deleted(terminate_instances: bool) -> WaitSpec<Self> {
        let (pending, target) = if terminate_instances {
            (
                vec![Self::Active, Self::Modifying, Self::DeletedTerminating],
                vec![Self::Deleted],
            )
        } else {
            (
                vec![Self::Active, Self::Modifying],
                vec![Self::Deleted, Self::DeletedRunning],
            )
        };
        WaitSpec::new(target)
            .pending(pending)
            .abort([Self::Failed])
            .absent(AbsentPolicy::Success)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum SpotFleetRequestState {
    Submitted,
    Active,
    Modifying,
    CancelledRunning,
    CancelledTerminating,
    Cancelled,
    Failed,
}

impl SpotFleetRequestState {
    pub fn created() -> WaitSpec<Self> {
        WaitSpec::new([Self::Active])
            .pending([Self::Submitted])
            .abort([Self::Failed])
            .absent(AbsentPolicy::RetryThenFail)
    }

    pub fn modified() -> WaitSpec<Self> {
        WaitSpec::new([Self::Active])
            .pending([Self::Modifying])
            .abort([Self::Failed])
    }

    pub fn cancelled(terminate_instances: bool) -> WaitSpec<Self> {
        let (pending, target) = if terminate_instances {
            (
                vec![Self::Active, Self::Modifying, Self::CancelledTerminating],
                vec![Self::Cancelled],
            )
        } else {
            (
                vec![Self::Active, Self::Modifying],
                vec![Self::Cancelled, Self::CancelledRunning],
            )
        };
        WaitSpec::new(target)
            .pending(pending)
            .abort([Self::Failed])
            .absent(AbsentPolicy::Success)
    }
}
