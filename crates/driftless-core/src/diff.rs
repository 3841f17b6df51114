// ── Collection differ ──
//
// Pure set arithmetic over synthetic keys. Element order is preserved
// (desired order for additions, observed order for removals) because
// ordered collections assign in the order they are added.

use std::collections::{HashMap, HashSet};

use crate::error::CoreError;
use crate::identity::{Keyed, SyntheticKey};

/// The minimal change that turns an observed collection into a desired one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta<E> {
    /// Desired elements whose key is not observed.
    pub to_add: Vec<E>,
    /// Observed elements whose key is not desired.
    pub to_remove: Vec<E>,
    /// Desired elements whose key is observed but whose payload differs
    /// (a changed description, a flipped flag).
    pub drifted: Vec<E>,
}

impl<E> Default for Delta<E> {
    fn default() -> Self {
        Self {
            to_add: Vec::new(),
            to_remove: Vec::new(),
            drifted: Vec::new(),
        }
    }
}

impl<E> Delta<E> {
    /// No element needs adding or removing. Drift alone does not count.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    pub fn has_drift(&self) -> bool {
        !self.drifted.is_empty()
    }
}

impl<E: Keyed + Clone> Delta<E> {
    /// Apply removals then additions to `observed`.
    pub fn apply_to(&self, observed: &[E]) -> Vec<E> {
        let removed: HashSet<SyntheticKey> =
            self.to_remove.iter().map(Keyed::synthetic_key).collect();
        observed
            .iter()
            .filter(|e| !removed.contains(&e.synthetic_key()))
            .chain(self.to_add.iter())
            .cloned()
            .collect()
    }
}

/// Compute `desired − observed` and `observed − desired` by synthetic key.
///
/// Repeated keys on either side contribute at most one element.
pub fn diff<E>(desired: &[E], observed: &[E]) -> Delta<E>
where
    E: Keyed + Clone + PartialEq,
{
    let mut observed_by_key: HashMap<SyntheticKey, &E> = HashMap::with_capacity(observed.len());
    for element in observed {
        observed_by_key.entry(element.synthetic_key()).or_insert(element);
    }

    let mut delta = Delta::default();
    let mut desired_keys = HashSet::with_capacity(desired.len());

    for element in desired {
        let key = element.synthetic_key();
        if desired_keys.contains(&key) {
            continue;
        }
        match observed_by_key.get(&key) {
            None => delta.to_add.push(element.clone()),
            Some(seen) if *seen != element => delta.drifted.push(element.clone()),
            Some(_) => {}
        }
        desired_keys.insert(key);
    }

    let mut removed = HashSet::new();
    for element in observed {
        let key = element.synthetic_key();
        if !desired_keys.contains(&key) && removed.insert(key) {
            delta.to_remove.push(element.clone());
        }
    }

    delta
}

/// Fold exact duplicates out of a desired collection.
///
/// Two elements with the same key but different payloads cannot both be
/// honoured and are rejected.
pub fn dedupe<E>(desired: Vec<E>) -> Result<Vec<E>, CoreError>
where
    E: Keyed + PartialEq,
{
    let mut seen: HashMap<SyntheticKey, usize> = HashMap::with_capacity(desired.len());
    let mut out: Vec<E> = Vec::with_capacity(desired.len());

    for element in desired {
        let key = element.synthetic_key();
        if let Some(&index) = seen.get(&key) {
            if out.get(index) != Some(&element) {
                return Err(CoreError::DuplicateElement {
                    key: key.to_string(),
                });
            }
            continue;
        }
        seen.insert(key, out.len());
        out.push(element);
    }

    Ok(out)
}

// ── Primary detection ────────────────────────────────────────────────

/// The primary element of an ordered collection moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryChange<'a, E> {
    pub previous: &'a E,
    /// `None` when the desired collection is empty.
    pub desired: Option<&'a E>,
}

/// The element flagged primary, falling back to position 0.
pub fn primary_of<E>(elements: &[E], is_primary: impl Fn(&E) -> bool) -> Option<&E> {
    elements
        .iter()
        .find(|e| is_primary(e))
        .or_else(|| elements.first())
}

/// Detect a primary element that would have to change in place.
///
/// Returns `None` when `previous` had no primary (nothing is attached yet)
/// or both sides share the same primary key.
pub fn primary_change<'a, E>(
    previous: &'a [E],
    desired: &'a [E],
    is_primary: impl Fn(&E) -> bool,
) -> Option<PrimaryChange<'a, E>>
where
    E: Keyed,
{
    let before = primary_of(previous, &is_primary)?;
    let after = primary_of(desired, &is_primary);

    match after {
        Some(after) if after.synthetic_key() == before.synthetic_key() => None,
        _ => Some(PrimaryChange {
            previous: before,
            desired: after,
        }),
    }
}
