// Instrumented in-memory remote collection for engine tests.
//
// Records every call, enforces version tokens when versioned, applies
// mutations atomically, and flags any two mutating calls that overlap.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use driftless_api::{
    CollectionClient, Error, LifecycleState, Mutation, Observed, StatePoller, VersionToken,
};
use driftless_core::{Keyed, Reconcilable, SyntheticKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Read,
    Mutate {
        op: &'static str,
        len: usize,
        version: Option<VersionToken>,
    },
    Poll,
}

impl Call {
    pub fn is_mutate(&self) -> bool {
        matches!(self, Self::Mutate { .. })
    }
}

/// Failure injected into the next mutating call. The call is not applied.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Another writer bumps the version first.
    Conflict,
    Throttle,
    Reject,
}

/// Failure or stale view injected into the next read.
#[derive(Debug, Clone)]
pub enum ReadFault<E> {
    Stale(Vec<E>),
    Throttle,
}

struct State<E> {
    elements: Vec<E>,
    version: u64,
    versioned: bool,
    /// Versioned mutations answer with the new token.
    echo_version: bool,
    exists: bool,
    mutation_faults: VecDeque<Option<Fault>>,
    read_faults: VecDeque<ReadFault<E>>,
    poll_states: VecDeque<LifecycleState>,
    calls: Vec<Call>,
}

pub struct FakeRemote<E> {
    state: Mutex<State<E>>,
    in_flight: AtomicUsize,
    overlapped: AtomicBool,
    mutate_delay: Duration,
}

impl<E: Reconcilable> FakeRemote<E> {
    /// An unversioned collection (incremental APIs).
    pub fn new(elements: Vec<E>) -> Self {
        Self {
            state: Mutex::new(State {
                elements: E::expand(elements),
                version: 1,
                versioned: false,
                echo_version: true,
                exists: true,
                mutation_faults: VecDeque::new(),
                read_faults: VecDeque::new(),
                poll_states: VecDeque::new(),
                calls: Vec::new(),
            }),
            in_flight: AtomicUsize::new(0),
            overlapped: AtomicBool::new(false),
            mutate_delay: Duration::ZERO,
        }
    }

    /// A collection guarded by a version token.
    pub fn versioned(elements: Vec<E>, version: u64) -> Self {
        let remote = Self::new(elements);
        {
            let mut state = remote.state.lock().unwrap();
            state.versioned = true;
            state.version = version;
        }
        remote
    }

    /// Successful mutations stop reporting the new token, as some APIs do.
    pub fn without_version_echo(self) -> Self {
        self.state.lock().unwrap().echo_version = false;
        self
    }

    /// A parent that does not exist.
    pub fn missing() -> Self {
        let remote = Self::new(Vec::new());
        remote.state.lock().unwrap().exists = false;
        remote
    }

    pub fn with_mutation_faults(self, faults: impl IntoIterator<Item = Option<Fault>>) -> Self {
        self.state.lock().unwrap().mutation_faults = faults.into_iter().collect();
        self
    }

    pub fn with_read_faults(self, faults: impl IntoIterator<Item = ReadFault<E>>) -> Self {
        self.state.lock().unwrap().read_faults = faults.into_iter().collect();
        self
    }

    pub fn with_poll_states(self, states: impl IntoIterator<Item = LifecycleState>) -> Self {
        self.state.lock().unwrap().poll_states = states.into_iter().collect();
        self
    }

    pub fn with_mutate_delay(mut self, delay: Duration) -> Self {
        self.mutate_delay = delay;
        self
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutate).collect()
    }

    pub fn reads(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Read).count()
    }

    pub fn elements(&self) -> Vec<E> {
        self.state.lock().unwrap().elements.clone()
    }

    pub fn keys(&self) -> HashSet<SyntheticKey> {
        self.elements().iter().map(Keyed::synthetic_key).collect()
    }

    pub fn version(&self) -> u64 {
        self.state.lock().unwrap().version
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    // ── Mutation semantics ───────────────────────────────────────────

    fn apply(&self, parent: &str, mutation: Mutation<E>) -> Result<Option<VersionToken>, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Mutate {
            op: mutation.operation(),
            len: mutation.len(),
            version: mutation.version(),
        });

        if !state.exists {
            return Err(Error::NotFound {
                resource: parent.to_owned(),
            });
        }

        match state.mutation_faults.pop_front().flatten() {
            Some(Fault::Conflict) => {
                state.version += 1;
                return Err(Error::PreconditionFailed {
                    resource: parent.to_owned(),
                    message: "version moved".into(),
                });
            }
            Some(Fault::Throttle) => return Err(Error::Throttled { retry_after: None }),
            Some(Fault::Reject) => {
                return Err(Error::Rejected {
                    status: 400,
                    code: Some("LimitExceeded".into()),
                    message: "quota exceeded".into(),
                });
            }
            None => {}
        }

        if state.versioned && mutation.version() != Some(VersionToken(state.version)) {
            return Err(Error::Conflict {
                resource: parent.to_owned(),
                message: "stale version".into(),
            });
        }

        let mut next = state.elements.clone();
        match mutation {
            Mutation::Add { elements, .. } => add(&mut next, elements, parent)?,
            Mutation::Remove { elements, .. } => remove(&mut next, elements, parent)?,
            Mutation::Modify {
                add: additions,
                remove: removals,
                ..
            } => {
                remove(&mut next, removals, parent)?;
                add(&mut next, additions, parent)?;
            }
            Mutation::Replace { elements, .. } => next = E::expand(elements),
        }

        state.elements = next;
        state.version += 1;
        Ok((state.versioned && state.echo_version).then_some(VersionToken(state.version)))
    }
}

fn add<E: Reconcilable>(into: &mut Vec<E>, elements: Vec<E>, parent: &str) -> Result<(), Error> {
    let present: HashSet<_> = into.iter().map(Keyed::synthetic_key).collect();
    let elements = E::expand(elements);
    if elements.iter().any(|e| present.contains(&e.synthetic_key())) {
        return Err(Error::Duplicate {
            resource: parent.to_owned(),
            message: "element already exists".into(),
        });
    }
    into.extend(elements);
    Ok(())
}

fn remove<E: Reconcilable>(from: &mut Vec<E>, elements: Vec<E>, parent: &str) -> Result<(), Error> {
    let present: HashSet<_> = from.iter().map(Keyed::synthetic_key).collect();
    let gone: HashSet<_> = E::expand(elements)
        .iter()
        .map(Keyed::synthetic_key)
        .collect();
    if !gone.is_subset(&present) {
        return Err(Error::NotFound {
            resource: parent.to_owned(),
        });
    }
    from.retain(|e| !gone.contains(&e.synthetic_key()));
    Ok(())
}

impl<E: Reconcilable> StatePoller for FakeRemote<E> {
    type State = LifecycleState;

    async fn poll_state(&self, id: &str) -> Result<LifecycleState, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Poll);
        if !state.exists {
            return Err(Error::NotFound {
                resource: id.to_owned(),
            });
        }
        let next = if state.poll_states.len() > 1 {
            state.poll_states.pop_front()
        } else {
            state.poll_states.front().copied()
        };
        Ok(next.unwrap_or(LifecycleState::Available))
    }
}

impl<E: Reconcilable> CollectionClient<E> for FakeRemote<E> {
    async fn read(&self, parent: &str) -> Result<Observed<E>, Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Read);
        if !state.exists {
            return Err(Error::NotFound {
                resource: parent.to_owned(),
            });
        }
        let version = state.versioned.then_some(VersionToken(state.version));
        match state.read_faults.pop_front() {
            Some(ReadFault::Stale(elements)) => Ok(Observed::new(elements, version)),
            Some(ReadFault::Throttle) => Err(Error::Throttled {
                retry_after: Some(Duration::from_millis(100)),
            }),
            None => Ok(Observed::new(E::collapse(state.elements.clone()), version)),
        }
    }

    async fn mutate(
        &self,
        parent: &str,
        mutation: Mutation<E>,
    ) -> Result<Option<VersionToken>, Error> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        if !self.mutate_delay.is_zero() {
            tokio::time::sleep(self.mutate_delay).await;
        }
        let result = self.apply(parent, mutation);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
