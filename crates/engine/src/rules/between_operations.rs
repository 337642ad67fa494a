//! "Between operations": a reason-free stretch before the next known
//! operation gets labeled, referencing that operation.
//!
//! The rule remembers the id of the previously seen operation beside its
//! cursor. When the next operation on the timeline differs, the stretch
//! between the cursor and that operation's start is the between-operations
//! period.

use std::ops::ControlFlow;

use autoreason_core::{ReasonId, TimeRange};

use crate::error::EngineError;
use crate::host::{Host, OperationSlice, StateValue, TimedSlice};
use crate::rule::{AutoReasonRule, PassContext};

pub const PREVIOUS_OPERATION_KEY: &str = "PreviousOperationId";

pub struct BetweenOperations {
    reason: ReasonId,
    score: f64,
}

impl BetweenOperations {
    pub fn new(reason: ReasonId, score: f64) -> Self {
        Self { reason, score }
    }

    fn first_operation(
        &self,
        ctx: &PassContext<'_>,
        host: &dyn Host,
        scan: &TimeRange,
    ) -> Result<Option<TimedSlice<OperationSlice>>, EngineError> {
        let mut first = None;
        ctx.scan_operations(host, scan, |slice| {
            first = Some(slice);
            Ok(ControlFlow::Break(()))
        })?;
        Ok(first)
    }
}

impl AutoReasonRule for BetweenOperations {
    fn name(&self) -> &str {
        "AutoReason.BetweenOperations"
    }

    fn reason(&self) -> ReasonId {
        self.reason
    }

    fn score(&self) -> f64 {
        self.score
    }

    fn marker_key(&self) -> Option<&str> {
        Some(PREVIOUS_OPERATION_KEY)
    }

    fn check(&mut self, ctx: &mut PassContext<'_>, host: &dyn Host) -> Result<(), EngineError> {
        ctx.checkpoint()?;
        let from = ctx.date_time();
        let horizon = ctx.now();
        if from >= horizon {
            return Ok(());
        }
        let scan = TimeRange::between(from, horizon);

        let Some(previous) = ctx.marker().and_then(StateValue::as_integer) else {
            // No baseline yet: remember the first operation after the cursor
            // and resume past it.
            if let Some(slice) = self.first_operation(ctx, host, &scan)? {
                ctx.set_marker(StateValue::from(slice.data.operation))?;
                let next = slice.range.upper().map_or(horizon, |u| u.min(horizon));
                ctx.advance_cursor_at_least(next);
            }
            return Ok(());
        };

        let Some(slice) = self.first_operation(ctx, host, &scan)? else {
            // No operation after the cursor yet; wait for more data.
            return Ok(());
        };
        if slice.data.operation.0 == previous {
            // Still the operation already accounted for.
            return Ok(());
        }

        if let Some(start) = slice.range.lower() {
            if from < start {
                let gap = TimeRange::between(from, start);
                let details = format!("Before operation {}", slice.data.operation);
                ctx.apply_reason(gap, Some(details));
            }
            ctx.set_marker(StateValue::from(slice.data.operation))?;
            ctx.advance_cursor_at_least(start);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use crate::cursor::Cursor;
    use crate::driver::{PassOutcome, RuleDriver};
    use crate::host::StateStore;
    use crate::memory::MemoryHost;
    use crate::pager::SlicePager;
    use autoreason_core::{
        EngineConfig, LivenessHandle, MachineId, OperationId, TimePoint,
    };
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::AtomicBool;

    fn t(minute: u32) -> TimePoint {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, minute, 0).unwrap()
    }

    fn r(lo: u32, hi: u32) -> TimeRange {
        TimeRange::between(t(lo), t(hi))
    }

    const MACHINE: MachineId = MachineId(1);

    fn seed_cursor(host: &MemoryHost, date_time: TimePoint, previous_op: Option<i64>) {
        host.save_state(
            MACHINE,
            "AutoReason.BetweenOperations.DateTime",
            StateValue::Timestamp(date_time),
        )
        .unwrap();
        if let Some(op) = previous_op {
            host.save_state(
                MACHINE,
                "AutoReason.BetweenOperations.PreviousOperationId",
                StateValue::Integer(op),
            )
            .unwrap();
        }
    }

    fn rule() -> BetweenOperations {
        BetweenOperations::new(ReasonId(10), 90.0)
    }

    fn driver() -> RuleDriver {
        RuleDriver::new(
            Box::new(rule()),
            MACHINE,
            &EngineConfig::default(),
            LivenessHandle::noop(),
        )
    }

    #[test]
    fn labels_the_gap_before_the_next_operation() {
        // Reason-free gap [10:00, 10:05) before a known operation at 10:05:
        // one domain action covering exactly the gap, one state action
        // advancing the cursor to 10:05.
        let host = MemoryHost::new();
        seed_cursor(&host, t(0), Some(1));
        host.seed_operation(MACHINE, r(5, 20), OperationId(2));

        let mut d = driver();
        let outcome = d
            .run_pass(&host, t(30), &AtomicBool::new(false))
            .unwrap();
        assert_eq!(outcome, PassOutcome::Committed { actions: 3 });

        let reasons = host.applied_reasons();
        assert_eq!(reasons.len(), 1);
        assert_eq!(reasons[0].range, r(0, 5));
        assert_eq!(reasons[0].reason, ReasonId(10));
        assert_eq!(reasons[0].details.as_deref(), Some("Before operation 2"));

        assert_eq!(d.cursor().unwrap().date_time, t(5));
        assert_eq!(d.cursor().unwrap().marker, Some(StateValue::Integer(2)));
    }

    #[test]
    fn queued_actions_cover_gap_and_cursor_exactly() {
        let host = MemoryHost::new();
        let pager = SlicePager::new(chrono::Duration::hours(24), 100).unwrap();
        let liveness = LivenessHandle::noop();
        let cancel = AtomicBool::new(false);
        host.seed_operation(MACHINE, r(5, 20), OperationId(2));

        let mut cursor = Cursor::new(t(0));
        cursor.marker = Some(StateValue::Integer(1));
        let mut ctx = PassContext::new(
            MACHINE,
            "AutoReason.BetweenOperations".to_string(),
            Some(PREVIOUS_OPERATION_KEY.to_string()),
            ReasonId(10),
            90.0,
            t(30),
            cursor,
            &pager,
            &liveness,
            &cancel,
        );
        rule().check(&mut ctx, &host).unwrap();

        let log = ctx.into_log();
        let actions: Vec<&Action> = log.actions().collect();
        assert!(matches!(
            actions[0],
            Action::ApplyReason { range, .. } if *range == r(0, 5)
        ));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::AdvanceCursor { next, .. } if *next == t(5))));
    }

    #[test]
    fn same_operation_queues_nothing() {
        let host = MemoryHost::new();
        seed_cursor(&host, t(0), Some(2));
        host.seed_operation(MACHINE, r(5, 20), OperationId(2));

        let mut d = driver();
        let outcome = d
            .run_pass(&host, t(30), &AtomicBool::new(false))
            .unwrap();
        assert_eq!(outcome, PassOutcome::NoAction);
        assert!(host.applied_reasons().is_empty());
    }

    #[test]
    fn first_pass_with_marker_unset_remembers_baseline() {
        let host = MemoryHost::new();
        seed_cursor(&host, t(0), None);
        host.seed_operation(MACHINE, r(2, 8), OperationId(7));

        let mut d = driver();
        let outcome = d
            .run_pass(&host, t(30), &AtomicBool::new(false))
            .unwrap();
        assert!(matches!(outcome, PassOutcome::Committed { .. }));

        // Baseline recorded, cursor moved past the operation, no reason yet.
        assert!(host.applied_reasons().is_empty());
        assert_eq!(d.cursor().unwrap().marker, Some(StateValue::Integer(7)));
        assert_eq!(d.cursor().unwrap().date_time, t(8));
    }

    #[test]
    fn no_operation_in_sight_waits() {
        let host = MemoryHost::new();
        seed_cursor(&host, t(0), Some(1));

        let mut d = driver();
        let outcome = d
            .run_pass(&host, t(30), &AtomicBool::new(false))
            .unwrap();
        assert_eq!(outcome, PassOutcome::NoAction);
    }

    #[test]
    fn operation_overlapping_the_cursor_leaves_no_gap() {
        let host = MemoryHost::new();
        seed_cursor(&host, t(10), Some(1));
        host.seed_operation(MACHINE, r(5, 20), OperationId(2));

        let mut d = driver();
        let outcome = d
            .run_pass(&host, t(30), &AtomicBool::new(false))
            .unwrap();
        // Marker and cursor move, but no reason is applied.
        assert!(matches!(outcome, PassOutcome::Committed { .. }));
        assert!(host.applied_reasons().is_empty());
        assert_eq!(d.cursor().unwrap().marker, Some(StateValue::Integer(2)));
    }
}
