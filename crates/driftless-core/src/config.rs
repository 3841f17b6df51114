// ── Runtime tuning ──
//
// These types describe how hard the engine tries: attempt budgets, backoff
// bounds and polling schedules. They never touch disk; `driftless-config`
// builds them from profiles and hands them in.

use std::time::Duration;

/// Exponential backoff bounds for conflict retries and throttled calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first retry. Default: 200ms.
    pub initial_delay: Duration,

    /// Upper bound on a single delay, before jitter. Default: 10s.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Polling schedule for a [`Waiter`](crate::waiter::Waiter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    /// Sleep after the first poll when it was not terminal.
    pub delay: Duration,

    /// Sleep between subsequent polls.
    pub poll_interval: Duration,

    /// Overall bound on the wait. There is no infinite wait.
    pub timeout: Duration,

    /// Consecutive not-found polls tolerated while awaiting creation.
    pub not_found_checks: u32,

    /// Consecutive target observations required before success.
    pub continuous_target_occurrence: u32,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
            not_found_checks: 20,
            continuous_target_occurrence: 1,
        }
    }
}

impl WaitConfig {
    /// A schedule with the given timeout and poll interval. The initial
    /// delay equals the interval.
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            delay: poll_interval,
            poll_interval,
            timeout,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    pub fn with_continuous_target_occurrence(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurrence = occurrences.max(1);
        self
    }
}

/// Budget for one `reconcile` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Mutation attempts before a version conflict is surfaced. Default: 5.
    pub max_attempts: u32,

    /// Retries of a throttled or transiently failing read. Default: 3.
    pub read_retries: u32,

    pub backoff: BackoffConfig,

    /// Schedule for the post-mutation settle wait on the parent.
    pub settle: WaitConfig,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            read_retries: 3,
            backoff: BackoffConfig::default(),
            settle: WaitConfig::default(),
        }
    }
}
