// ── MutexScope ──
//
// Named critical sections keyed by parent resource ID. A reconciler holds
// the scope for its whole read-diff-mutate-wait sequence. The table is an
// injected service object, not a process global, so independent engines
// (and tests) never share locks by accident.

use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::BuildHasher;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

enum Slots {
    /// One lock per key, created lazily and never removed.
    PerKey(DashMap<String, Arc<Mutex<()>>>),
    /// A fixed set of locks shared by hash. Unrelated keys may contend, but
    /// memory stays bounded in long-lived processes.
    Striped {
        stripes: Box<[Arc<Mutex<()>>]>,
        hasher: RandomState,
    },
}

/// Table of [`MutexScope`](ScopeGuard)s.
pub struct LockTable {
    slots: Slots,
}

impl LockTable {
    pub fn per_key() -> Self {
        Self {
            slots: Slots::PerKey(DashMap::new()),
        }
    }

    /// A table with a fixed number of locks. `stripes` is clamped to at least 1.
    pub fn striped(stripes: usize) -> Self {
        let stripes = (0..stripes.max(1))
            .map(|_| Arc::new(Mutex::new(())))
            .collect();
        Self {
            slots: Slots::Striped {
                stripes,
                hasher: RandomState::new(),
            },
        }
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        match &self.slots {
            Slots::PerKey(map) => {
                // The map guard is dropped here, before anyone awaits the lock.
                Arc::clone(map.entry(key.to_owned()).or_default().value())
            }
            Slots::Striped { stripes, hasher } => {
                let len = u64::try_from(stripes.len()).unwrap_or(u64::MAX);
                let index = usize::try_from(hasher.hash_one(key) % len).unwrap_or(0);
                stripes
                    .get(index)
                    .map_or_else(|| Arc::new(Mutex::new(())), Arc::clone)
            }
        }
    }

    /// Wait for exclusive use of `key`. The scope is released when the
    /// returned guard drops, including during unwinding.
    pub async fn acquire(&self, key: &str) -> ScopeGuard {
        let lock = self.slot(key);
        trace!(scope = key, "waiting for lock");
        let guard = lock.lock_owned().await;
        trace!(scope = key, "lock acquired");
        ScopeGuard {
            key: key.to_owned(),
            _guard: guard,
        }
    }

    /// Take the scope only if it is free right now.
    pub fn try_acquire(&self, key: &str) -> Option<ScopeGuard> {
        let guard = self.slot(key).try_lock_owned().ok()?;
        Some(ScopeGuard {
            key: key.to_owned(),
            _guard: guard,
        })
    }

    /// Number of distinct locks currently allocated.
    pub fn len(&self) -> usize {
        match &self.slots {
            Slots::PerKey(map) => map.len(),
            Slots::Striped { stripes, .. } => stripes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::per_key()
    }
}

impl fmt::Debug for LockTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.slots {
            Slots::PerKey(_) => "per-key",
            Slots::Striped { .. } => "striped",
        };
        f.debug_struct("LockTable")
            .field("mode", &mode)
            .field("locks", &self.len())
            .finish()
    }
}

/// A held MutexScope.
pub struct ScopeGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl ScopeGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        trace!(scope = %self.key, "lock released");
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard").field("key", &self.key).finish()
    }
}
