//! [`SlotAccumulator`] — a sorted, non-overlapping sequence of time-ranged
//! values with exact boundary handling for additions and removals.

use std::marker::PhantomData;

use autoreason_core::{LivenessHandle, TimePoint, TimeRange};

/// The value combinators an accumulator is built from.
///
/// `insert`/`merge` drive additions, `delete`/`unmerge` removals, and
/// `should_drop` is the purge predicate.
pub trait SlotFold<V, U> {
    /// Accumulated value for a range that held nothing before the addition.
    fn insert(&self, value: &V) -> U;

    /// Fold an added value into an existing accumulated value.
    fn merge(&self, current: U, value: &V) -> U;

    /// Accumulated value for a range that held nothing before the removal.
    fn delete(&self, value: &V) -> U;

    /// Fold a removed value out of an existing accumulated value.
    fn unmerge(&self, current: U, value: &V) -> U;

    /// Whether an accumulated value is a net no-op that purging discards.
    fn should_drop(&self, current: &U) -> bool;
}

/// One (range, value) entry held by the accumulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry<U> {
    pub range: TimeRange,
    pub value: U,
}

/// Flush sink for [`SlotAccumulator::store`].
pub trait SlotWriter<U> {
    type Error;

    fn write(&mut self, range: &TimeRange, value: &U) -> Result<(), Self::Error>;
}

/// Signal liveness once per this many entries while flushing.
const STORE_ACTIVE_EVERY: usize = 32;

/// Position on the time axis, including both infinities, so bound
/// comparisons need no per-case `Option` juggling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Cut {
    NegInf,
    At(TimePoint),
    PosInf,
}

impl Cut {
    fn from_lower(b: Option<TimePoint>) -> Self {
        b.map_or(Cut::NegInf, Cut::At)
    }

    fn from_upper(b: Option<TimePoint>) -> Self {
        b.map_or(Cut::PosInf, Cut::At)
    }
}

/// The range `[lo, hi)`, or `None` when it covers nothing.
fn range_between(lo: Cut, hi: Cut) -> Option<TimeRange> {
    if lo >= hi {
        return None;
    }
    let lower = match lo {
        Cut::NegInf => None,
        Cut::At(t) => Some(t),
        Cut::PosInf => return None,
    };
    let upper = match hi {
        Cut::PosInf => None,
        Cut::At(t) => Some(t),
        Cut::NegInf => return None,
    };
    Some(TimeRange::new(lower, upper))
}

/// Interval-value store over an unbounded timeline.
///
/// Entries stay sorted and non-overlapping; gaps between entries are
/// permitted. Entries are created, split, merged and purged only by the
/// accumulator's own operations. The accumulator raises no domain errors of
/// its own — malformed input is a caller usage error and fails fast.
pub struct SlotAccumulator<V, U, F> {
    entries: Vec<SlotEntry<U>>,
    fold: F,
    _value: PhantomData<fn(&V)>,
}

impl<V, U, F> SlotAccumulator<V, U, F>
where
    U: Clone,
    F: SlotFold<V, U>,
{
    pub fn new(fold: F) -> Self {
        Self {
            entries: Vec::new(),
            fold,
            _value: PhantomData,
        }
    }

    /// Fold `value` into every instant of `range`.
    ///
    /// Gaps inside `range` become new `insert` entries; overlapped portions
    /// of existing entries are replaced with `merge(existing, value)`, with
    /// any non-overlapping remainder split off untouched. Adding over an
    /// empty range is a no-op.
    pub fn add(&mut self, range: &TimeRange, value: &V) {
        self.apply(range, value, true);
    }

    /// Fold `value` out of every instant of `range`; symmetric to
    /// [`add`](SlotAccumulator::add) with `delete`/`unmerge`.
    ///
    /// Unmerged portions whose value satisfies the purge predicate are
    /// dropped immediately, so removing exactly what was added restores the
    /// previous entry list.
    pub fn remove(&mut self, range: &TimeRange, value: &V) {
        self.apply(range, value, false);
    }

    fn seed(&self, value: &V, additive: bool) -> U {
        if additive {
            self.fold.insert(value)
        } else {
            self.fold.delete(value)
        }
    }

    fn apply(&mut self, range: &TimeRange, value: &V, additive: bool) {
        if range.is_empty() {
            return;
        }
        let r_lo = Cut::from_lower(range.lower());
        let r_hi = Cut::from_upper(range.upper());

        let previous = std::mem::take(&mut self.entries);
        let mut out = Vec::with_capacity(previous.len() + 2);
        // Upper bound of the part of `range` already accounted for.
        let mut covered_to = r_lo;
        let mut open = true;

        for entry in previous {
            let e_lo = Cut::from_lower(entry.range.lower());
            let e_hi = Cut::from_upper(entry.range.upper());

            // Strictly left of `range`: untouched.
            if e_hi <= r_lo {
                out.push(entry);
                continue;
            }

            // Strictly right of `range`, or `range` fully covered: close out
            // any remainder, then pass the entry through untouched.
            if !open || r_hi <= e_lo {
                if open {
                    if let Some(tail) = range_between(covered_to, r_hi) {
                        out.push(SlotEntry {
                            range: tail,
                            value: self.seed(value, additive),
                        });
                    }
                    open = false;
                }
                out.push(entry);
                continue;
            }

            // Overlapping entry.
            let ov_lo = e_lo.max(r_lo);
            let ov_hi = e_hi.min(r_hi);

            if let Some(gap) = range_between(covered_to, ov_lo) {
                out.push(SlotEntry {
                    range: gap,
                    value: self.seed(value, additive),
                });
            }
            if let Some(left) = range_between(e_lo, ov_lo) {
                out.push(SlotEntry {
                    range: left,
                    value: entry.value.clone(),
                });
            }
            let right = range_between(ov_hi, e_hi).map(|r| SlotEntry {
                range: r,
                value: entry.value.clone(),
            });

            let overlap = range_between(ov_lo, ov_hi).expect("overlap is non-empty");
            let folded = if additive {
                self.fold.merge(entry.value, value)
            } else {
                self.fold.unmerge(entry.value, value)
            };
            // A removal netting out to nothing leaves a gap instead of a
            // no-op entry.
            if additive || !self.fold.should_drop(&folded) {
                out.push(SlotEntry {
                    range: overlap,
                    value: folded,
                });
            }
            if let Some(r) = right {
                out.push(r);
            }

            covered_to = ov_hi;
            if covered_to >= r_hi {
                open = false;
            }
        }

        if open {
            if let Some(tail) = range_between(covered_to, r_hi) {
                out.push(SlotEntry {
                    range: tail,
                    value: self.seed(value, additive),
                });
            }
        }

        self.entries = out;
    }

    /// Drop every entry whose value satisfies the purge predicate, in one
    /// filtering pass. Returns the number of entries dropped.
    pub fn purge(&mut self) -> usize {
        let before = self.entries.len();
        let fold = &self.fold;
        self.entries.retain(|e| !fold.should_drop(&e.value));
        before - self.entries.len()
    }

    /// The span between the first and last entry, or `None` when the
    /// accumulator holds nothing.
    pub fn global_range(&self) -> Option<TimeRange> {
        let first = self.entries.first()?;
        let last = self.entries.last()?;
        Some(TimeRange::new(first.range.lower(), last.range.upper()))
    }

    pub fn entries(&self) -> &[SlotEntry<U>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flush every entry through `writer`, signalling liveness periodically
    /// while iterating a potentially large entry list. Returns the number of
    /// entries written.
    pub fn store<W>(
        &self,
        label: &str,
        writer: &mut W,
        liveness: &LivenessHandle,
    ) -> Result<usize, W::Error>
    where
        W: SlotWriter<U>,
    {
        let mut written = 0;
        for (i, entry) in self.entries.iter().enumerate() {
            if i % STORE_ACTIVE_EVERY == 0 {
                liveness.set_active();
            }
            writer.write(&entry.range, &entry.value)?;
            written += 1;
        }
        tracing::debug!(label = %label, entries = written, "slot store flushed");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ChangeFold, ChangeTracker};
    use autoreason_core::{Liveness, LivenessRelay};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn t(minute: u32) -> TimePoint {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, minute, 0).unwrap()
    }

    fn r(lo: u32, hi: u32) -> TimeRange {
        TimeRange::between(t(lo), t(hi))
    }

    fn acc() -> SlotAccumulator<i32, ChangeTracker<i32>, ChangeFold<i32>> {
        SlotAccumulator::new(ChangeFold::new())
    }

    #[test]
    fn disjoint_adds_yield_two_insert_entries() {
        let mut a = acc();
        a.add(&r(0, 5), &1);
        a.add(&r(10, 15), &2);

        assert_eq!(a.len(), 2);
        assert_eq!(a.entries()[0].range, r(0, 5));
        assert_eq!(a.entries()[0].value, ChangeTracker::insert(1));
        assert_eq!(a.entries()[1].range, r(10, 15));
        assert_eq!(a.entries()[1].value, ChangeTracker::insert(2));
    }

    #[test]
    fn disjoint_adds_are_order_independent() {
        let mut forward = acc();
        forward.add(&r(0, 5), &1);
        forward.add(&r(10, 15), &2);

        let mut backward = acc();
        backward.add(&r(10, 15), &2);
        backward.add(&r(0, 5), &1);

        assert_eq!(forward.entries(), backward.entries());
    }

    #[test]
    fn nested_add_splits_and_merges() {
        // r1 ⊆ r2, v1 added before v2: r2 is covered exactly once, the r1
        // sub-range holding merge(insert(v1), v2), the remainder insert(v2).
        let mut a = acc();
        a.add(&r(5, 10), &1);
        a.add(&r(0, 15), &2);

        assert_eq!(a.len(), 3);
        assert_eq!(a.entries()[0].range, r(0, 5));
        assert_eq!(a.entries()[0].value, ChangeTracker::insert(2));
        assert_eq!(a.entries()[1].range, r(5, 10));
        assert_eq!(a.entries()[1].value, ChangeTracker::update(1, 2));
        assert_eq!(a.entries()[2].range, r(10, 15));
        assert_eq!(a.entries()[2].value, ChangeTracker::insert(2));
    }

    #[test]
    fn covering_entry_splits_into_three() {
        let mut a = acc();
        a.add(&r(0, 30), &1);
        a.add(&r(10, 20), &2);

        assert_eq!(a.len(), 3);
        assert_eq!(a.entries()[0].range, r(0, 10));
        assert_eq!(a.entries()[0].value, ChangeTracker::insert(1));
        assert_eq!(a.entries()[1].range, r(10, 20));
        assert_eq!(a.entries()[1].value, ChangeTracker::update(1, 2));
        assert_eq!(a.entries()[2].range, r(20, 30));
        assert_eq!(a.entries()[2].value, ChangeTracker::insert(1));
    }

    #[test]
    fn add_fills_gaps_between_existing_entries() {
        let mut a = acc();
        a.add(&r(5, 10), &1);
        a.add(&r(20, 25), &1);
        a.add(&r(0, 30), &2);

        // No internal gaps remain inside [0, 30).
        let ranges: Vec<TimeRange> = a.entries().iter().map(|e| e.range).collect();
        assert_eq!(
            ranges,
            vec![r(0, 5), r(5, 10), r(10, 20), r(20, 25), r(25, 30)]
        );
        assert_eq!(a.entries()[2].value, ChangeTracker::insert(2));
        assert_eq!(a.entries()[3].value, ChangeTracker::update(1, 2));
    }

    #[test]
    fn entries_outside_range_are_untouched() {
        let mut a = acc();
        a.add(&r(0, 5), &1);
        a.add(&r(40, 45), &9);
        a.add(&r(10, 20), &2);

        assert_eq!(a.entries()[0].range, r(0, 5));
        assert_eq!(a.entries()[0].value, ChangeTracker::insert(1));
        assert_eq!(a.entries()[2].range, r(40, 45));
        assert_eq!(a.entries()[2].value, ChangeTracker::insert(9));
    }

    #[test]
    fn add_remove_round_trip_restores_empty_list() {
        let mut a = acc();
        a.add(&r(0, 10), &7);
        a.remove(&r(0, 10), &7);
        assert!(a.is_empty());
    }

    #[test]
    fn partial_remove_keeps_outer_portions() {
        let mut a = acc();
        a.add(&r(0, 30), &7);
        a.remove(&r(10, 20), &7);

        assert_eq!(a.len(), 2);
        assert_eq!(a.entries()[0].range, r(0, 10));
        assert_eq!(a.entries()[1].range, r(20, 30));
    }

    #[test]
    fn remove_over_gap_records_a_delete() {
        let mut a = acc();
        a.remove(&r(0, 5), &7);

        assert_eq!(a.len(), 1);
        assert_eq!(a.entries()[0].value, ChangeTracker::delete(7));
    }

    #[test]
    fn purge_is_idempotent() {
        let mut a = acc();
        a.add(&r(0, 5), &1);
        a.add(&r(10, 15), &2);
        a.add(&r(10, 15), &2); // nets old == new on the second range
        a.add(&r(10, 15), &2);

        let dropped = a.purge();
        let entries_after_first = a.entries().to_vec();
        assert_eq!(a.purge(), 0);
        assert_eq!(a.entries(), entries_after_first.as_slice());
        assert!(dropped <= 2);
    }

    #[test]
    fn purge_drops_net_noop_changes() {
        let mut a = acc();
        a.add(&r(0, 10), &5);
        a.add(&r(0, 10), &7);
        a.add(&r(0, 10), &5);

        assert_eq!(a.entries()[0].value, ChangeTracker::update(5, 5));
        assert_eq!(a.purge(), 1);
        assert!(a.is_empty());
    }

    #[test]
    fn global_range_spans_first_to_last() {
        let mut a = acc();
        assert_eq!(a.global_range(), None);

        a.add(&r(5, 10), &1);
        a.add(&r(20, 25), &2);
        assert_eq!(a.global_range(), Some(r(5, 25)));
    }

    #[test]
    fn global_range_with_unbounded_sides() {
        let mut a = acc();
        a.add(&TimeRange::until(t(5)), &1);
        a.add(&TimeRange::from(t(20)), &2);
        assert_eq!(a.global_range(), Some(TimeRange::all()));
    }

    #[test]
    fn empty_range_add_is_a_noop() {
        let mut a = acc();
        a.add(&r(5, 5), &1);
        assert!(a.is_empty());
    }

    #[derive(Default)]
    struct CountingWriter {
        written: usize,
    }

    impl SlotWriter<ChangeTracker<i32>> for CountingWriter {
        type Error = std::convert::Infallible;

        fn write(
            &mut self,
            _range: &TimeRange,
            _value: &ChangeTracker<i32>,
        ) -> Result<(), Self::Error> {
            self.written += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct ActiveCounter(AtomicUsize);

    impl Liveness for ActiveCounter {
        fn set_active(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn pause_check(&self) {}
        fn resume_check(&self) {}
    }

    #[test]
    fn store_flushes_all_entries_and_signals_liveness() {
        let mut a = acc();
        for i in 0..100u32 {
            let start = t(0) + chrono::Duration::seconds(i as i64);
            let range = TimeRange::between(start, start + chrono::Duration::seconds(1));
            a.add(&range, &(i as i32));
        }

        let relay = Arc::new(LivenessRelay::new());
        let counter = Arc::new(ActiveCounter::default());
        relay.add_checked_caller(counter.clone());

        let mut writer = CountingWriter::default();
        let written = a
            .store("test", &mut writer, &relay.handle())
            .expect("infallible");

        assert_eq!(written, 100);
        assert_eq!(writer.written, 100);
        // One signal per STORE_ACTIVE_EVERY entries.
        assert_eq!(counter.0.load(Ordering::SeqCst), 4);
    }
}
