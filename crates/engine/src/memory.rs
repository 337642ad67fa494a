//! In-memory host implementation for tests and the worker binary.
//!
//! Backs the timeline, cursor store and reason sink with plain maps behind
//! an `RwLock`. Transactions snapshot the mutable tables on `begin` and
//! restore them on `rollback`; `fail_next_commit`/`fail_next_save` inject
//! transient persistence failures for unwind tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, RwLock};

use autoreason_core::{MachineId, OperationId, ReasonId, TimeRange};

use crate::error::EngineError;
use crate::host::{
    ActivitySlice, OperationSlice, ReasonSink, StateStore, StateValue, TimedSlice, Timeline,
    UnitOfWork,
};

/// One reason application recorded by the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedReason {
    pub machine: MachineId,
    pub range: TimeRange,
    pub reason: ReasonId,
    pub score: f64,
    pub details: Option<String>,
    pub dynamic: Option<String>,
    pub overwrite: bool,
}

#[derive(Default)]
struct Tables {
    activity: HashMap<MachineId, Vec<TimedSlice<ActivitySlice>>>,
    operations: HashMap<MachineId, Vec<TimedSlice<OperationSlice>>>,
    state: BTreeMap<(MachineId, String), StateValue>,
    reasons: Vec<AppliedReason>,
}

struct TxSnapshot {
    label: String,
    state: BTreeMap<(MachineId, String), StateValue>,
    reasons: Vec<AppliedReason>,
}

/// In-memory [`Host`](crate::host::Host).
///
/// Transactions are serialized: `begin` blocks while another transaction is
/// active, matching one-commit-per-pass semantics when machines run in
/// parallel.
#[derive(Default)]
pub struct MemoryHost {
    tables: RwLock<Tables>,
    tx: Mutex<Option<TxSnapshot>>,
    tx_free: Condvar,
    fail_next_commit: AtomicBool,
    fail_next_save: AtomicBool,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an activity slice on a machine's timeline.
    pub fn seed_activity(&self, machine: MachineId, range: TimeRange, running: bool) {
        let mut tables = self.tables.write().expect("memory host lock poisoned");
        let slices = tables.activity.entry(machine).or_default();
        slices.push(TimedSlice {
            range,
            data: ActivitySlice { running },
        });
        slices.sort_by_key(|s| s.range.lower());
    }

    /// Record an operation slice on a machine's timeline.
    pub fn seed_operation(&self, machine: MachineId, range: TimeRange, operation: OperationId) {
        let mut tables = self.tables.write().expect("memory host lock poisoned");
        let slices = tables.operations.entry(machine).or_default();
        slices.push(TimedSlice {
            range,
            data: OperationSlice { operation },
        });
        slices.sort_by_key(|s| s.range.lower());
    }

    /// Every reason applied so far, in application order.
    pub fn applied_reasons(&self) -> Vec<AppliedReason> {
        self.tables
            .read()
            .expect("memory host lock poisoned")
            .reasons
            .clone()
    }

    /// Force the next `commit` to fail with a transient persistence error.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Force the next `save_state` to fail with a transient persistence
    /// error.
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    fn overlapping<D: Copy>(
        slices: Option<&Vec<TimedSlice<D>>>,
        range: &TimeRange,
        limit: usize,
    ) -> Vec<TimedSlice<D>> {
        slices
            .map(|all| {
                all.iter()
                    .filter(|s| s.range.intersect(range).is_some())
                    .take(limit)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Timeline for MemoryHost {
    fn activity_slices(
        &self,
        machine: MachineId,
        range: &TimeRange,
        limit: usize,
    ) -> Result<Vec<TimedSlice<ActivitySlice>>, EngineError> {
        let tables = self.tables.read().expect("memory host lock poisoned");
        Ok(Self::overlapping(tables.activity.get(&machine), range, limit))
    }

    fn operation_slices(
        &self,
        machine: MachineId,
        range: &TimeRange,
        limit: usize,
    ) -> Result<Vec<TimedSlice<OperationSlice>>, EngineError> {
        let tables = self.tables.read().expect("memory host lock poisoned");
        Ok(Self::overlapping(
            tables.operations.get(&machine),
            range,
            limit,
        ))
    }
}

impl StateStore for MemoryHost {
    fn get_state(&self, machine: MachineId, key: &str) -> Result<Option<StateValue>, EngineError> {
        let tables = self.tables.read().expect("memory host lock poisoned");
        Ok(tables.state.get(&(machine, key.to_string())).cloned())
    }

    fn save_state(
        &self,
        machine: MachineId,
        key: &str,
        value: StateValue,
    ) -> Result<(), EngineError> {
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(EngineError::Persistence("forced save failure".into()));
        }
        let mut tables = self.tables.write().expect("memory host lock poisoned");
        tables.state.insert((machine, key.to_string()), value);
        Ok(())
    }

    fn remove_state(&self, machine: MachineId, key: &str) -> Result<(), EngineError> {
        let mut tables = self.tables.write().expect("memory host lock poisoned");
        tables.state.remove(&(machine, key.to_string()));
        Ok(())
    }
}

impl UnitOfWork for MemoryHost {
    fn begin(&self, label: &str) -> Result<(), EngineError> {
        let mut tx = self.tx.lock().expect("memory host tx lock poisoned");
        while tx.is_some() {
            tx = self
                .tx_free
                .wait(tx)
                .expect("memory host tx lock poisoned");
        }
        let tables = self.tables.read().expect("memory host lock poisoned");
        *tx = Some(TxSnapshot {
            label: label.to_string(),
            state: tables.state.clone(),
            reasons: tables.reasons.clone(),
        });
        Ok(())
    }

    fn commit(&self) -> Result<(), EngineError> {
        let mut tx = self.tx.lock().expect("memory host tx lock poisoned");
        match tx.take() {
            None => Err(EngineError::Invariant(
                "commit without an open transaction".into(),
            )),
            Some(snapshot) => {
                if self.fail_next_commit.swap(false, Ordering::SeqCst) {
                    // The transaction stays open; the caller rolls back.
                    *tx = Some(snapshot);
                    return Err(EngineError::Persistence("forced commit failure".into()));
                }
                tracing::trace!(label = %snapshot.label, "transaction committed");
                self.tx_free.notify_one();
                Ok(())
            }
        }
    }

    fn rollback(&self) -> Result<(), EngineError> {
        let mut tx = self.tx.lock().expect("memory host tx lock poisoned");
        match tx.take() {
            None => Err(EngineError::Invariant(
                "rollback without an open transaction".into(),
            )),
            Some(snapshot) => {
                let mut tables = self.tables.write().expect("memory host lock poisoned");
                tables.state = snapshot.state;
                tables.reasons = snapshot.reasons;
                tracing::trace!(label = %snapshot.label, "transaction rolled back");
                self.tx_free.notify_one();
                Ok(())
            }
        }
    }
}

impl ReasonSink for MemoryHost {
    fn apply_reason(
        &self,
        machine: MachineId,
        range: &TimeRange,
        reason: ReasonId,
        score: f64,
        details: Option<&str>,
        dynamic: Option<&str>,
        overwrite: bool,
    ) -> Result<(), EngineError> {
        let mut tables = self.tables.write().expect("memory host lock poisoned");
        tables.reasons.push(AppliedReason {
            machine,
            range: *range,
            reason,
            score,
            details: details.map(str::to_string),
            dynamic: dynamic.map(str::to_string),
            overwrite,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t(minute: u32) -> autoreason_core::TimePoint {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, minute, 0).unwrap()
    }

    fn r(lo: u32, hi: u32) -> TimeRange {
        TimeRange::between(t(lo), t(hi))
    }

    #[test]
    fn timeline_queries_are_ordered_and_limited() {
        let host = MemoryHost::new();
        let m = MachineId(1);
        host.seed_operation(m, r(20, 25), OperationId(3));
        host.seed_operation(m, r(0, 5), OperationId(1));
        host.seed_operation(m, r(10, 15), OperationId(2));

        let slices = host.operation_slices(m, &r(0, 30), 2).unwrap();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].data.operation, OperationId(1));
        assert_eq!(slices[1].data.operation, OperationId(2));
    }

    #[test]
    fn timeline_is_per_machine() {
        let host = MemoryHost::new();
        host.seed_activity(MachineId(1), r(0, 5), true);

        assert_eq!(host.activity_slices(MachineId(2), &r(0, 30), 10).unwrap(), vec![]);
        assert_eq!(host.activity_slices(MachineId(1), &r(0, 30), 10).unwrap().len(), 1);
    }

    #[test]
    fn rollback_restores_state_and_reasons() {
        let host = MemoryHost::new();
        let m = MachineId(1);
        host.save_state(m, "k", StateValue::Integer(1)).unwrap();

        host.begin("test").unwrap();
        host.save_state(m, "k", StateValue::Integer(2)).unwrap();
        host.apply_reason(m, &r(0, 5), ReasonId(1), 90.0, None, None, false)
            .unwrap();
        host.rollback().unwrap();

        assert_eq!(host.get_state(m, "k").unwrap(), Some(StateValue::Integer(1)));
        assert!(host.applied_reasons().is_empty());
    }

    #[test]
    fn commit_keeps_changes() {
        let host = MemoryHost::new();
        let m = MachineId(1);

        host.begin("test").unwrap();
        host.save_state(m, "k", StateValue::Integer(2)).unwrap();
        host.commit().unwrap();

        assert_eq!(host.get_state(m, "k").unwrap(), Some(StateValue::Integer(2)));
    }

    #[test]
    fn forced_commit_failure_leaves_transaction_open() {
        let host = MemoryHost::new();
        let m = MachineId(1);

        host.begin("test").unwrap();
        host.save_state(m, "k", StateValue::Integer(2)).unwrap();
        host.fail_next_commit();
        assert!(host.commit().is_err());

        // The rollback that follows restores the pre-transaction state.
        host.rollback().unwrap();
        assert_eq!(host.get_state(m, "k").unwrap(), None);
    }

    #[test]
    fn commit_without_transaction_is_invariant_violation() {
        let host = MemoryHost::new();
        assert!(host.commit().unwrap_err().is_fatal());
        assert!(host.rollback().unwrap_err().is_fatal());
    }
}
