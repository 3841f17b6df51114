// ── Waiter ──
//
// Bounded polling of a remote asynchronous operation. The only suspension
// points are the poll itself and the sleep between polls; both race the
// caller's cancellation token. Cancelling stops local polling only, the
// remote operation keeps its own lifecycle.

use std::fmt;
use std::time::Duration;

use driftless_api::{LifecycleState, StatePoller};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff::throttle_delay;
use crate::config::{BackoffConfig, WaitConfig};
use crate::error::CoreError;

// ── WaitSpec ─────────────────────────────────────────────────────────

/// How to interpret the object disappearing while we wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsentPolicy {
    /// Absence is the goal (deletion).
    Success,
    /// Absence is a permanent failure.
    Failure,
    /// Absence may be an eventual-consistency gap (creation). Tolerated for
    /// `not_found_checks` consecutive polls.
    RetryThenFail,
}

/// The states a wait distinguishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitSpec<S> {
    /// States to keep polling through. Empty means any state that is neither
    /// target nor abort.
    pub pending: Vec<S>,
    pub target: Vec<S>,
    pub abort: Vec<S>,
    pub absent: AbsentPolicy,
}

impl<S: PartialEq> WaitSpec<S> {
    pub fn new(target: impl IntoIterator<Item = S>) -> Self {
        Self {
            pending: Vec::new(),
            target: target.into_iter().collect(),
            abort: Vec::new(),
            absent: AbsentPolicy::Failure,
        }
    }

    pub fn pending(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.pending = states.into_iter().collect();
        self
    }

    pub fn abort(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.abort = states.into_iter().collect();
        self
    }

    pub fn absent(mut self, policy: AbsentPolicy) -> Self {
        self.absent = policy;
        self
    }
}

impl<S: fmt::Display> WaitSpec<S> {
    fn expected(&self) -> Vec<String> {
        self.pending
            .iter()
            .chain(&self.target)
            .map(ToString::to_string)
            .collect()
    }
}

// ── Presets ──────────────────────────────────────────────────────────

/// Wait for a freshly created object to become available.
pub fn lifecycle_created() -> WaitSpec<LifecycleState> {
    WaitSpec::new([LifecycleState::Available])
        .pending([LifecycleState::Pending, LifecycleState::InProgress])
        .abort([LifecycleState::Failed])
        .absent(AbsentPolicy::RetryThenFail)
}

/// Wait for an object to be deleted. Absence counts as deleted.
pub fn lifecycle_deleted() -> WaitSpec<LifecycleState> {
    WaitSpec::new([LifecycleState::Deleted])
        .abort([LifecycleState::Failed])
        .absent(AbsentPolicy::Success)
}

/// Wait for an in-place modification to settle.
pub fn lifecycle_modified() -> WaitSpec<LifecycleState> {
    WaitSpec::new([LifecycleState::Available])
        .pending([
            LifecycleState::Pending,
            LifecycleState::InProgress,
            LifecycleState::Modifying,
        ])
        .abort([LifecycleState::Failed])
        .absent(AbsentPolicy::Failure)
}

// ── Waiter ───────────────────────────────────────────────────────────

/// Result of a successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome<S> {
    /// The final state, or `None` when absence was the success condition.
    pub state: Option<S>,
    pub polls: u32,
    pub elapsed: Duration,
}

/// Polls a [`StatePoller`] on a fixed schedule.
#[derive(Debug, Clone, Default)]
pub struct Waiter {
    config: WaitConfig,
    backoff: BackoffConfig,
}

impl Waiter {
    pub fn new(config: WaitConfig) -> Self {
        Self {
            config,
            backoff: BackoffConfig::default(),
        }
    }

    /// Backoff used when a poll is throttled.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn config(&self) -> &WaitConfig {
        &self.config
    }

    pub async fn wait_for<P>(
        &self,
        poller: &P,
        id: &str,
        spec: &WaitSpec<P::State>,
    ) -> Result<WaitOutcome<P::State>, CoreError>
    where
        P: StatePoller,
    {
        self.wait_for_cancellable(poller, id, spec, &CancellationToken::new())
            .await
    }

    /// Poll `id` until it reaches a state in `spec.target`.
    ///
    /// The first poll is immediate. A wait returns `Timeout` no later than
    /// `timeout` plus one poll interval, even if a poll hangs.
    pub async fn wait_for_cancellable<P>(
        &self,
        poller: &P,
        id: &str,
        spec: &WaitSpec<P::State>,
        cancel: &CancellationToken,
    ) -> Result<WaitOutcome<P::State>, CoreError>
    where
        P: StatePoller,
    {
        let config = &self.config;
        let required = config.continuous_target_occurrence.max(1);
        let start = Instant::now();
        let deadline = start + config.timeout;
        let hard_deadline = deadline + config.poll_interval;

        let mut polls: u32 = 0;
        let mut not_found: u32 = 0;
        let mut throttles: u32 = 0;
        let mut target_streak: u32 = 0;
        let mut last_state = String::from("none");

        loop {
            polls += 1;
            let outcome = |state| WaitOutcome {
                state,
                polls,
                elapsed: start.elapsed(),
            };

            let polled = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(CoreError::Cancelled { id: id.to_owned(), polls });
                }
                result = poller.poll_state(id) => result,
                () = tokio::time::sleep_until(hard_deadline) => {
                    return Err(CoreError::Timeout {
                        id: id.to_owned(),
                        elapsed: start.elapsed(),
                        last_state,
                    });
                }
            };

            let mut extra_pause = None;
            match polled {
                Ok(state) => {
                    debug!(id, state = %state, polls, "polled state");
                    not_found = 0;

                    if spec.target.contains(&state) {
                        target_streak += 1;
                        if target_streak >= required {
                            return Ok(outcome(Some(state)));
                        }
                    } else {
                        target_streak = 0;
                        if spec.abort.contains(&state) {
                            return Err(CoreError::AbortState {
                                id: id.to_owned(),
                                state: state.to_string(),
                            });
                        }
                        if !spec.pending.is_empty() && !spec.pending.contains(&state) {
                            return Err(CoreError::UnexpectedState {
                                id: id.to_owned(),
                                state: state.to_string(),
                                expected: spec.expected(),
                            });
                        }
                    }
                    last_state = state.to_string();
                }
                Err(e) if e.is_not_found() => {
                    target_streak = 0;
                    match spec.absent {
                        AbsentPolicy::Success => {
                            debug!(id, polls, "object absent");
                            return Ok(outcome(None));
                        }
                        AbsentPolicy::Failure => {
                            return Err(CoreError::NotFound {
                                resource: id.to_owned(),
                            });
                        }
                        AbsentPolicy::RetryThenFail => {
                            not_found += 1;
                            if not_found > config.not_found_checks {
                                return Err(CoreError::NotFound {
                                    resource: id.to_owned(),
                                });
                            }
                            debug!(id, not_found, "object not yet visible");
                            last_state = String::from("absent");
                        }
                    }
                }
                Err(e) if e.is_throttled() => {
                    let pause = throttle_delay(throttles, e.retry_after(), &self.backoff);
                    warn!(id, ?pause, "state poll throttled");
                    throttles += 1;
                    extra_pause = Some(pause);
                }
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(CoreError::Timeout {
                    id: id.to_owned(),
                    elapsed: now - start,
                    last_state,
                });
            }

            let scheduled = if polls == 1 {
                config.delay
            } else {
                config.poll_interval
            };
            let pause = extra_pause
                .map_or(scheduled, |p| p.max(scheduled))
                .min(deadline - now);

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(CoreError::Cancelled { id: id.to_owned(), polls });
                }
                () = tokio::time::sleep(pause) => {}
            }
        }
    }
}
