// ── Reconciler ──
//
// Converges one remote collection under a MutexScope: read, diff, mutate,
// settle, confirm. The scope is held for the whole sequence. Mutations are
// retried only on version conflicts and throttling, both of which mean the
// call was not applied; every retry starts from a fresh read. Within a pass
// each call carries the token returned by the previous one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use driftless_api::{
    CollectionClient, LifecycleState, Mutation, Observed, StatePoller, VersionToken,
};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::backoff::{calculate_backoff, throttle_delay};
use crate::config::ReconcileConfig;
use crate::diff::{Delta, dedupe, diff, primary_change};
use crate::error::CoreError;
use crate::identity::{Keyed, SyntheticKey};
use crate::lock::LockTable;
use crate::policy::{
    ApplyOrder, Batching, DriftPolicy, MutationStyle, PrimaryPolicy, Reconcilable,
};
use crate::waiter::{Waiter, lifecycle_modified};

// ── Results ──────────────────────────────────────────────────────────

/// Counters for what a reconcile call changed remotely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedChanges {
    pub added: usize,
    pub removed: usize,
    /// Drifted elements replaced by remove-then-add.
    pub recreated: usize,
    /// Mutating calls that succeeded.
    pub calls: u32,
    /// Planning passes that issued at least one call.
    pub attempts: u32,
}

impl AppliedChanges {
    pub fn is_noop(&self) -> bool {
        self.calls == 0
    }
}

/// The confirmed remote collection after a reconcile call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled<E> {
    /// Remote elements, expanded to independently keyed units.
    pub elements: Vec<E>,
    pub version: Option<VersionToken>,
    pub applied: AppliedChanges,
    /// Conditions that did not fail the call (duplicates that proved to be
    /// our own, removals that were already gone, ignored drift).
    pub warnings: Vec<String>,
}

// ── Plan ─────────────────────────────────────────────────────────────

struct Plan<E> {
    additions: Vec<E>,
    removals: Vec<E>,
    recreated: usize,
    /// Full desired contents, for whole-collection replacement.
    desired: Vec<E>,
}

impl<E: Reconcilable> Plan<E> {
    fn build(delta: Delta<E>, observed: &[E], desired: &[E]) -> Self {
        let mut additions = delta.to_add;
        let mut removals = delta.to_remove;
        let mut recreated = 0;

        if E::POLICY.drift == DriftPolicy::Recreate && !delta.drifted.is_empty() {
            let drifted: HashSet<SyntheticKey> =
                delta.drifted.iter().map(Keyed::synthetic_key).collect();
            removals.extend(
                observed
                    .iter()
                    .filter(|e| drifted.contains(&e.synthetic_key()))
                    .cloned(),
            );
            recreated = delta.drifted.len();
            additions.extend(delta.drifted);
        }

        Self {
            additions,
            removals,
            recreated,
            desired: desired.to_vec(),
        }
    }

    fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }
}

/// Why an apply pass stopped.
enum Interrupted {
    /// Version mismatch; nothing from the failing call was applied.
    Conflict,
    /// Throttled; nothing from the failing call was applied.
    Throttled(Option<Duration>),
    /// A call succeeded without reporting the collection's new version, so
    /// the rest of the plan needs a fresh read first.
    Replan,
    Fatal(CoreError),
}

/// Version token threaded through the calls of one apply pass.
struct Cursor {
    version: Option<VersionToken>,
    /// The held token was consumed by a call that reported no successor.
    stale: bool,
}

impl Cursor {
    fn new(version: Option<VersionToken>) -> Self {
        Self {
            version,
            stale: false,
        }
    }

    fn advance(&mut self, next: Option<VersionToken>) {
        match next {
            Some(_) => self.version = next,
            None => self.stale = self.version.is_some(),
        }
    }

    fn reset(&mut self, version: Option<VersionToken>) {
        self.version = version;
        self.stale = false;
    }
}

#[derive(Default)]
struct Progress {
    applied: AppliedChanges,
    completed: Vec<String>,
    warnings: Vec<String>,
}

impl Progress {
    fn record(&mut self, step: &str, added: usize, removed: usize) {
        self.applied.added += added;
        self.applied.removed += removed;
        self.applied.calls += 1;
        self.completed.push(step.to_owned());
    }
}

// ── Reconciler ───────────────────────────────────────────────────────

/// Converges remote collections through a [`CollectionClient`].
#[derive(Debug)]
pub struct Reconciler<C> {
    client: C,
    locks: Arc<LockTable>,
    config: ReconcileConfig,
}

impl<C> Reconciler<C> {
    /// Reconcilers sharing a parent space must share `locks`.
    pub fn new(client: C, locks: Arc<LockTable>, config: ReconcileConfig) -> Self {
        Self {
            client,
            locks,
            config,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Converge `parent`'s collection to `desired` and return the confirmed
    /// remote state.
    ///
    /// An already converged collection costs one read and no mutating call.
    pub async fn reconcile<E>(
        &self,
        parent: &str,
        desired: Vec<E>,
    ) -> Result<Reconciled<E>, CoreError>
    where
        C: CollectionClient<E>,
        E: Reconcilable,
    {
        let span = info_span!("reconcile", parent, kind = E::KIND);
        self.reconcile_inner(parent, desired).instrument(span).await
    }

    async fn reconcile_inner<E>(
        &self,
        parent: &str,
        desired: Vec<E>,
    ) -> Result<Reconciled<E>, CoreError>
    where
        C: CollectionClient<E>,
        E: Reconcilable,
    {
        for element in &desired {
            element.validate()?;
        }
        let desired = dedupe(E::expand(desired))?;

        let _scope = self.locks.acquire(parent).await;

        let mut progress = Progress::default();
        let mut attempt: u32 = 0;
        // Conflicts and throttles; successful re-planning is free.
        let mut failures: u32 = 0;
        let mut drift_noted = false;

        loop {
            let observed = self.read::<E>(parent).await?;
            let current = E::expand(observed.elements);

            if E::POLICY.primary == PrimaryPolicy::Protected {
                let previous = primary_candidates(&current);
                let wanted = primary_candidates(&desired);
                if let Some(change) = primary_change(&previous, &wanted, E::is_primary) {
                    return Err(CoreError::ReplacePrimary {
                        parent: parent.to_owned(),
                        previous: change.previous.to_string(),
                        desired: change
                            .desired
                            .map_or_else(|| String::from("<none>"), ToString::to_string),
                    });
                }
            }

            let delta = diff(&desired, &current);
            if E::POLICY.drift == DriftPolicy::Ignore && delta.has_drift() {
                debug!(drifted = delta.drifted.len(), "ignoring payload drift");
            }
            let ignored_drift = match E::POLICY.drift {
                DriftPolicy::Ignore => delta.drifted.len(),
                DriftPolicy::Recreate => 0,
            };
            if ignored_drift > 0 && !drift_noted {
                drift_noted = true;
                progress.warnings.push(format!(
                    "{ignored_drift} element(s) differ only in non-identity fields"
                ));
            }
            let plan = Plan::build(delta, &current, &desired);

            if plan.is_empty() {
                if progress.applied.is_noop() {
                    debug!("already converged");
                    return Ok(Reconciled {
                        elements: current,
                        version: observed.version,
                        applied: progress.applied,
                        warnings: progress.warnings,
                    });
                }
                // An earlier pass landed everything before being interrupted.
                break;
            }

            attempt += 1;
            progress.applied.attempts = attempt;
            let recreated = plan.recreated;

            let mut cursor = Cursor::new(observed.version);
            let outcome = self.apply(parent, &mut cursor, plan, &mut progress).await;
            if matches!(
                outcome,
                Err(Interrupted::Conflict | Interrupted::Throttled(_))
            ) {
                failures += 1;
            }

            match outcome {
                Ok(()) => {
                    progress.applied.recreated += recreated;
                    break;
                }
                Err(Interrupted::Fatal(err)) => return Err(err),
                Err(Interrupted::Replan) => {
                    debug!(calls = progress.applied.calls, "no version reported, re-reading");
                }
                Err(Interrupted::Conflict) if failures < self.config.max_attempts => {
                    let pause = calculate_backoff(failures - 1, &self.config.backoff);
                    warn!(attempt, failures, ?pause, "version conflict, re-reading");
                    tokio::time::sleep(pause).await;
                }
                Err(Interrupted::Throttled(retry_after)) if failures < self.config.max_attempts => {
                    let pause = throttle_delay(failures - 1, retry_after, &self.config.backoff);
                    warn!(attempt, failures, ?pause, "mutation throttled, re-reading");
                    tokio::time::sleep(pause).await;
                }
                Err(Interrupted::Conflict) => {
                    let err = CoreError::VersionConflictExhausted {
                        parent: parent.to_owned(),
                        operation: operation_name::<E>(),
                        attempts: failures,
                    };
                    return Err(CoreError::partial(
                        parent,
                        progress.completed,
                        operation_name::<E>(),
                        err,
                    ));
                }
                Err(Interrupted::Throttled(retry_after)) => {
                    return Err(CoreError::partial(
                        parent,
                        progress.completed,
                        operation_name::<E>(),
                        CoreError::Throttled { retry_after },
                    ));
                }
            }
        }

        info!(
            added = progress.applied.added,
            removed = progress.applied.removed,
            recreated = progress.applied.recreated,
            calls = progress.applied.calls,
            "applied delta"
        );

        self.settle(parent)
            .await
            .map_err(|err| CoreError::partial(parent, progress.completed.clone(), "settle", err))?;

        let confirmed = self.read::<E>(parent).await?;
        Ok(Reconciled {
            elements: E::expand(confirmed.elements),
            version: confirmed.version,
            applied: progress.applied,
            warnings: progress.warnings,
        })
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Read with bounded retries for throttling and transient failures.
    /// A missing parent is fatal and not retried.
    async fn read<E>(&self, parent: &str) -> Result<Observed<E>, CoreError>
    where
        C: CollectionClient<E>,
        E: Send + Sync,
    {
        let mut retries: u32 = 0;
        loop {
            match self.client.read(parent).await {
                Ok(observed) => {
                    debug!(version = ?observed.version, "read collection");
                    return Ok(observed);
                }
                Err(e) if e.is_not_found() => return Err(e.into()),
                Err(e) if e.is_transient() && retries < self.config.read_retries => {
                    let pause = throttle_delay(retries, e.retry_after(), &self.config.backoff);
                    warn!(retries, ?pause, error = %e, "read failed, retrying");
                    retries += 1;
                    tokio::time::sleep(pause).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn settle(&self, parent: &str) -> Result<(), CoreError>
    where
        C: StatePoller<State = LifecycleState>,
    {
        Waiter::new(self.config.settle)
            .with_backoff(self.config.backoff)
            .wait_for(&self.client, parent, &lifecycle_modified())
            .await
            .map(|outcome| debug!(polls = outcome.polls, "parent settled"))
    }

    // ── Mutations ────────────────────────────────────────────────────

    async fn apply<E>(
        &self,
        parent: &str,
        cursor: &mut Cursor,
        plan: Plan<E>,
        progress: &mut Progress,
    ) -> Result<(), Interrupted>
    where
        C: CollectionClient<E>,
        E: Reconcilable,
    {
        match E::POLICY.style {
            MutationStyle::Versioned => {
                let (added, removed) = (plan.additions.len(), plan.removals.len());
                let mutation = Mutation::Modify {
                    version: cursor.version,
                    add: E::collapse(plan.additions),
                    remove: E::collapse(plan.removals),
                };
                self.call(parent, cursor, mutation, progress, added, removed).await
            }
            MutationStyle::Replace => {
                let (added, removed) = (plan.additions.len(), plan.removals.len());
                let mutation = Mutation::Replace {
                    version: cursor.version,
                    elements: E::collapse(plan.desired),
                };
                self.call(parent, cursor, mutation, progress, added, removed).await
            }
            MutationStyle::Incremental(order) => {
                let Plan {
                    additions,
                    removals,
                    ..
                } = plan;
                match order {
                    ApplyOrder::RemoveThenAdd => {
                        self.remove_all(parent, cursor, removals, progress).await?;
                        self.add_all(parent, cursor, additions, progress).await
                    }
                    ApplyOrder::AddThenRemove => {
                        self.add_all(parent, cursor, additions, progress).await?;
                        self.remove_all(parent, cursor, removals, progress).await
                    }
                }
            }
        }
    }

    async fn add_all<E>(
        &self,
        parent: &str,
        cursor: &mut Cursor,
        additions: Vec<E>,
        progress: &mut Progress,
    ) -> Result<(), Interrupted>
    where
        C: CollectionClient<E>,
        E: Reconcilable,
    {
        if additions.is_empty() {
            return Ok(());
        }
        match E::POLICY.batching {
            Batching::Whole => {
                let count = additions.len();
                let mutation = Mutation::Add {
                    version: cursor.version,
                    elements: E::collapse(additions),
                };
                self.call(parent, cursor, mutation, progress, count, 0).await
            }
            Batching::OnePerCall => {
                for element in additions {
                    let mutation = Mutation::Add {
                        version: cursor.version,
                        elements: vec![element],
                    };
                    self.call(parent, cursor, mutation, progress, 1, 0).await?;
                }
                Ok(())
            }
        }
    }

    async fn remove_all<E>(
        &self,
        parent: &str,
        cursor: &mut Cursor,
        removals: Vec<E>,
        progress: &mut Progress,
    ) -> Result<(), Interrupted>
    where
        C: CollectionClient<E>,
        E: Reconcilable,
    {
        if removals.is_empty() {
            return Ok(());
        }
        let count = removals.len();
        let mutation = Mutation::Remove {
            version: cursor.version,
            elements: E::collapse(removals),
        };
        self.call(parent, cursor, mutation, progress, 0, count).await
    }

    /// Issue one mutating call, advance the cursor and classify any failure.
    async fn call<E>(
        &self,
        parent: &str,
        cursor: &mut Cursor,
        mutation: Mutation<E>,
        progress: &mut Progress,
        added: usize,
        removed: usize,
    ) -> Result<(), Interrupted>
    where
        C: CollectionClient<E>,
        E: Reconcilable,
    {
        if cursor.stale {
            return Err(Interrupted::Replan);
        }
        let step = format!("{} {}", mutation.operation(), mutation.len());
        let (expect_present, expect_absent) = match &mutation {
            Mutation::Add { elements, .. } => (keys_of(elements), HashSet::new()),
            Mutation::Remove { elements, .. } => (HashSet::new(), keys_of(elements)),
            Mutation::Modify { .. } | Mutation::Replace { .. } => (HashSet::new(), HashSet::new()),
        };
        debug!(step = %step, version = ?mutation.version(), "issuing mutation");

        let err = match self.client.mutate(parent, mutation).await {
            Ok(next) => {
                progress.record(&step, added, removed);
                cursor.advance(next);
                return Ok(());
            }
            Err(err) => err,
        };

        if err.is_version_conflict() {
            debug!(step = %step, error = %err, "version conflict");
            return Err(Interrupted::Conflict);
        }
        if err.is_throttled() {
            return Err(Interrupted::Throttled(err.retry_after()));
        }

        // A duplicate add or a not-found remove is harmless only if a fresh
        // read shows the collection already in the intended shape.
        let idempotent = (err.is_duplicate() && !expect_present.is_empty())
            || (err.is_not_found() && !expect_absent.is_empty());
        if idempotent {
            let current = match self.read::<E>(parent).await {
                Ok(observed) => {
                    cursor.reset(observed.version);
                    keys_of(&E::expand(observed.elements))
                }
                Err(read_err) => {
                    return Err(Interrupted::Fatal(CoreError::partial(
                        parent,
                        progress.completed.clone(),
                        step,
                        read_err,
                    )));
                }
            };
            if expect_present.is_subset(&current) && expect_absent.is_disjoint(&current) {
                warn!(step = %step, error = %err, "treating as already applied");
                progress
                    .warnings
                    .push(format!("{step}: {err} (already applied)"));
                progress.record(&step, added, removed);
                return Ok(());
            }
        }

        Err(Interrupted::Fatal(CoreError::partial(
            parent,
            progress.completed.clone(),
            step,
            err.into(),
        )))
    }
}

fn keys_of<E: Reconcilable>(elements: &[E]) -> HashSet<SyntheticKey> {
    E::expand(elements.to_vec())
        .iter()
        .map(Keyed::synthetic_key)
        .collect()
}

fn primary_candidates<E: Reconcilable>(elements: &[E]) -> Vec<E> {
    elements
        .iter()
        .filter(|e| e.primary_eligible())
        .cloned()
        .collect()
}

fn operation_name<E: Reconcilable>() -> &'static str {
    match E::POLICY.style {
        MutationStyle::Incremental(_) => "add/remove",
        MutationStyle::Versioned => "modify",
        MutationStyle::Replace => "replace",
    }
}
