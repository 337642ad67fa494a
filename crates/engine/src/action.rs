//! The delayed, reversible action log.
//!
//! Actions are queued during one analysis pass and either all run inside
//! one transaction (success) or all reset in reverse order (failure). Each
//! variant carries the data needed to compute its own inverse — no captured
//! closures, no reliance on shared mutable state. Prior values are
//! snapshotted at queue time, not at run time.

use autoreason_core::{MachineId, ReasonId, TimePoint, TimeRange};
use tracing::error;

use crate::cursor::Cursor;
use crate::error::EngineError;
use crate::host::{Host, StateValue};

/// A forward operation plus everything needed for its exact compensating
/// inverse.
///
/// State actions (`AdvanceCursor`, `SetMarker`) mutate a persisted cursor
/// field; the domain action (`ApplyReason`) applies a labeled reason to a
/// time range. For every owning state `s`, `reset(run(s)) == s`.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    AdvanceCursor {
        key: String,
        next: TimePoint,
        /// In-memory cursor value when the action was queued.
        prior: TimePoint,
    },
    SetMarker {
        key: String,
        next: StateValue,
        /// In-memory marker value when the action was queued.
        prior: Option<StateValue>,
    },
    ApplyReason {
        range: TimeRange,
        reason: ReasonId,
        score: f64,
        details: Option<String>,
        dynamic: Option<String>,
        overwrite: bool,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::AdvanceCursor { .. } => "advance-cursor",
            Action::SetMarker { .. } => "set-marker",
            Action::ApplyReason { .. } => "apply-reason",
        }
    }

    pub fn is_state_action(&self) -> bool {
        !matches!(self, Action::ApplyReason { .. })
    }

    /// Apply the forward operation: mutate the in-memory cursor first, then
    /// the persisted side. Must run inside an open transaction.
    fn run(&self, machine: MachineId, cursor: &mut Cursor, host: &dyn Host) -> Result<(), EngineError> {
        match self {
            Action::AdvanceCursor { key, next, .. } => {
                cursor.date_time = *next;
                host.save_state(machine, key, StateValue::Timestamp(*next))
            }
            Action::SetMarker { key, next, .. } => {
                cursor.marker = Some(next.clone());
                host.save_state(machine, key, next.clone())
            }
            Action::ApplyReason {
                range,
                reason,
                score,
                details,
                dynamic,
                overwrite,
            } => host.apply_reason(
                machine,
                range,
                *reason,
                *score,
                details.as_deref(),
                dynamic.as_deref(),
                *overwrite,
            ),
        }
    }

    /// Apply the compensating inverse to the in-memory cursor. Persisted
    /// effects are discarded by the enclosing transaction rollback.
    fn reset(&self, cursor: &mut Cursor) {
        match self {
            Action::AdvanceCursor { prior, .. } => cursor.date_time = *prior,
            Action::SetMarker { prior, .. } => cursor.marker = prior.clone(),
            Action::ApplyReason { .. } => {}
        }
    }
}

#[derive(Debug)]
struct Queued {
    action: Action,
    ran: bool,
}

/// Ordered queue of delayed actions for one pass.
///
/// Queuing never mutates external state; only [`run_all`](ActionLog::run_all)
/// does. The log never outlives the pass that built it.
#[derive(Debug, Default)]
pub struct ActionLog {
    queued: Vec<Queued>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: Action) {
        self.queued.push(Queued { action, ran: false });
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.queued.iter().map(|q| &q.action)
    }

    /// Run every queued action in order. Stops at the first failure; the
    /// failing action counts as run (its in-memory mutation happened) so a
    /// subsequent [`reset_all`](ActionLog::reset_all) restores it too.
    pub fn run_all(
        &mut self,
        machine: MachineId,
        cursor: &mut Cursor,
        host: &dyn Host,
    ) -> Result<(), EngineError> {
        for q in &mut self.queued {
            q.ran = true;
            q.action.run(machine, cursor, host)?;
        }
        Ok(())
    }

    /// Reset every already-run action in reverse order, restoring the
    /// in-memory cursor to its pre-pass value.
    ///
    /// A never-run action sitting below a run one means the log was
    /// replayed out of order; continuing could corrupt the persisted
    /// cursor, so that is fatal.
    pub fn reset_all(&mut self, cursor: &mut Cursor) {
        let mut resetting = false;
        for q in self.queued.iter_mut().rev() {
            if q.ran {
                resetting = true;
                q.action.reset(cursor);
                q.ran = false;
            } else if resetting {
                error!(action = q.action.name(), "reset of an action that never ran");
                panic!("reset of an action that never ran");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::state_key;
    use crate::host::{StateStore, UnitOfWork};
    use crate::memory::MemoryHost;
    use autoreason_core::MachineId;
    use chrono::{TimeZone, Utc};

    fn t(minute: u32) -> TimePoint {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, minute, 0).unwrap()
    }

    #[test]
    fn run_all_applies_in_order_and_persists() {
        let host = MemoryHost::new();
        let machine = MachineId(1);
        let mut cursor = Cursor::new(t(0));

        let mut log = ActionLog::new();
        log.push(Action::ApplyReason {
            range: TimeRange::between(t(0), t(5)),
            reason: ReasonId(10),
            score: 90.0,
            details: None,
            dynamic: None,
            overwrite: false,
        });
        log.push(Action::SetMarker {
            key: state_key("r", "PreviousOperationId"),
            next: StateValue::Integer(42),
            prior: None,
        });
        log.push(Action::AdvanceCursor {
            key: state_key("r", "DateTime"),
            next: t(5),
            prior: t(0),
        });

        host.begin("test").unwrap();
        log.run_all(machine, &mut cursor, &host).unwrap();
        host.commit().unwrap();

        assert_eq!(cursor.date_time, t(5));
        assert_eq!(cursor.marker, Some(StateValue::Integer(42)));
        assert_eq!(
            host.get_state(machine, "r.DateTime").unwrap(),
            Some(StateValue::Timestamp(t(5)))
        );
        assert_eq!(host.applied_reasons().len(), 1);
    }

    #[test]
    fn reset_all_restores_pre_pass_cursor() {
        let host = MemoryHost::new();
        let machine = MachineId(1);
        let mut cursor = Cursor::new(t(0));
        cursor.marker = Some(StateValue::Integer(7));
        let snapshot = cursor.clone();

        let mut log = ActionLog::new();
        log.push(Action::AdvanceCursor {
            key: state_key("r", "DateTime"),
            next: t(3),
            prior: t(0),
        });
        log.push(Action::SetMarker {
            key: state_key("r", "PreviousOperationId"),
            next: StateValue::Integer(42),
            prior: Some(StateValue::Integer(7)),
        });
        log.push(Action::AdvanceCursor {
            key: state_key("r", "DateTime"),
            next: t(5),
            prior: t(3),
        });

        host.begin("test").unwrap();
        log.run_all(machine, &mut cursor, &host).unwrap();
        assert_eq!(cursor.date_time, t(5));

        log.reset_all(&mut cursor);
        host.rollback().unwrap();

        assert_eq!(cursor, snapshot);
        assert_eq!(host.get_state(machine, "r.DateTime").unwrap(), None);
    }

    #[test]
    fn reset_all_skips_never_run_suffix() {
        let host = MemoryHost::new();
        let machine = MachineId(1);
        let mut cursor = Cursor::new(t(0));

        let mut log = ActionLog::new();
        log.push(Action::AdvanceCursor {
            key: "r.DateTime".into(),
            next: t(5),
            prior: t(0),
        });
        log.push(Action::AdvanceCursor {
            key: "r.DateTime".into(),
            next: t(9),
            prior: t(0),
        });

        host.begin("test").unwrap();
        host.fail_next_save();
        // First action's save fails; second never runs.
        assert!(log.run_all(machine, &mut cursor, &host).is_err());
        log.reset_all(&mut cursor);
        host.rollback().unwrap();

        assert_eq!(cursor.date_time, t(0));
    }

    #[test]
    #[should_panic(expected = "reset of an action that never ran")]
    fn out_of_order_log_is_fatal() {
        let mut cursor = Cursor::new(t(0));
        let mut log = ActionLog::new();
        log.push(Action::AdvanceCursor {
            key: "r.DateTime".into(),
            next: t(5),
            prior: t(0),
        });
        log.push(Action::AdvanceCursor {
            key: "r.DateTime".into(),
            next: t(9),
            prior: t(5),
        });
        // Corrupt the log: the later action ran, the earlier one did not.
        log.queued[1].ran = true;
        log.reset_all(&mut cursor);
    }

    #[test]
    fn reset_run_round_trip_is_identity() {
        let host = MemoryHost::new();
        let machine = MachineId(1);

        for marker in [None, Some(StateValue::Integer(3))] {
            let mut cursor = Cursor {
                date_time: t(1),
                marker: marker.clone(),
            };
            let snapshot = cursor.clone();

            let mut log = ActionLog::new();
            log.push(Action::AdvanceCursor {
                key: "r.DateTime".into(),
                next: t(8),
                prior: cursor.date_time,
            });
            log.push(Action::SetMarker {
                key: "r.Marker".into(),
                next: StateValue::Integer(99),
                prior: marker,
            });

            host.begin("test").unwrap();
            log.run_all(machine, &mut cursor, &host).unwrap();
            log.reset_all(&mut cursor);
            host.rollback().unwrap();

            assert_eq!(cursor, snapshot);
        }
    }
}
