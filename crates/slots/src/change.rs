//! [`ChangeTracker`] — models an interval's lifecycle across one analysis
//! pass so that only net changes reach the persistent store.

use std::marker::PhantomData;

use serde::Serialize;
use tracing::error;

use crate::accumulator::SlotFold;

/// The pending change for one interval: what the store held before the pass
/// (`old`) and what it should hold after (`new`).
///
/// Pure insert: `{None, Some}`. Pure delete: `{Some, None}`. Update:
/// `{Some, Some}`. `{None, None}` is the empty tracker (a value inserted and
/// removed again within the same pass).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeTracker<T> {
    old: Option<T>,
    new: Option<T>,
}

impl<T> ChangeTracker<T> {
    /// A value that did not exist before the pass.
    pub fn insert(value: T) -> Self {
        Self {
            old: None,
            new: Some(value),
        }
    }

    /// A value removed from the store.
    pub fn delete(value: T) -> Self {
        Self {
            old: Some(value),
            new: None,
        }
    }

    /// A value changed against its pre-pass baseline.
    pub fn update(old: T, new: T) -> Self {
        Self {
            old: Some(old),
            new: Some(new),
        }
    }

    /// No pending change at all.
    pub fn empty() -> Self {
        Self {
            old: None,
            new: None,
        }
    }

    pub fn old(&self) -> Option<&T> {
        self.old.as_ref()
    }

    pub fn new(&self) -> Option<&T> {
        self.new.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.old.is_none() && self.new.is_none()
    }
}

impl<T: PartialEq> ChangeTracker<T> {
    /// Whether flushing this change would leave the store unchanged.
    pub fn is_noop(&self) -> bool {
        self.old == self.new
    }
}

/// [`SlotFold`] implementation accumulating [`ChangeTracker`] values.
pub struct ChangeFold<T>(PhantomData<fn(&T)>);

impl<T> ChangeFold<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for ChangeFold<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotFold<T, ChangeTracker<T>> for ChangeFold<T>
where
    T: Clone + PartialEq + std::fmt::Debug,
{
    fn insert(&self, value: &T) -> ChangeTracker<T> {
        ChangeTracker::insert(value.clone())
    }

    /// An update against the original baseline. The baseline is whatever the
    /// tracker first saw: a captured pre-pass value, or the first value
    /// inserted during the pass. Merging onto the empty tracker is a fresh
    /// insert.
    fn merge(&self, current: ChangeTracker<T>, value: &T) -> ChangeTracker<T> {
        match (current.old, current.new) {
            (Some(old), _) => ChangeTracker::update(old, value.clone()),
            (None, Some(first)) => ChangeTracker::update(first, value.clone()),
            (None, None) => ChangeTracker::insert(value.clone()),
        }
    }

    fn delete(&self, value: &T) -> ChangeTracker<T> {
        ChangeTracker::delete(value.clone())
    }

    /// Invariant: the removed value must equal the tracker's current `new`
    /// value; a mismatch means the caller removed something it never added,
    /// which would corrupt the baseline.
    fn unmerge(&self, current: ChangeTracker<T>, removed: &T) -> ChangeTracker<T> {
        if current.new.as_ref() != Some(removed) {
            error!(
                current = ?current.new,
                removed = ?removed,
                "unmerge of a value that is not the tracked one"
            );
            panic!("unmerge of a value that is not the tracked one");
        }
        match current.old {
            Some(old) => ChangeTracker::delete(old),
            None => ChangeTracker::empty(),
        }
    }

    fn should_drop(&self, current: &ChangeTracker<T>) -> bool {
        current.is_noop()
    }
}
