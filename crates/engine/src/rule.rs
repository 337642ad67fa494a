//! The rule surface: what a detection rule implements and what it sees
//! during one analysis pass.

use std::sync::atomic::{AtomicBool, Ordering};

use autoreason_core::{LivenessHandle, MachineId, ReasonId, TimePoint, TimeRange};

use crate::action::{Action, ActionLog};
use crate::cursor::{state_key, Cursor, DATE_TIME_KEY};
use crate::error::EngineError;
use crate::host::{Host, StateValue};
use crate::pager::SlicePager;

/// A pluggable detection rule deciding whether a time range should receive
/// a label.
///
/// `check` is a short read-only analysis pass: it scans forward from the
/// cursor through paginated slice queries and queues prospective mutations
/// on the [`PassContext`]; it never mutates external state itself.
pub trait AutoReasonRule: Send {
    /// Stable rule key, used as the prefix of its cursor-store keys.
    fn name(&self) -> &str;

    /// The reason this rule applies.
    fn reason(&self) -> ReasonId;

    /// Score attached to applied reasons.
    fn score(&self) -> f64;

    /// Sub-key of the correlated marker this rule persists beside its
    /// date/time cursor, if any.
    fn marker_key(&self) -> Option<&str> {
        None
    }

    /// Validate configuration and warm up internal state. A failure here is
    /// fatal: the rule is rejected at engine construction.
    fn initialize(&mut self, _host: &dyn Host, _machine: MachineId) -> Result<(), EngineError> {
        Ok(())
    }

    /// Derive the initial cursor from the earliest unprocessed data on the
    /// very first pass. `None` falls back to the configured first-run
    /// period.
    fn initial_cursor(
        &self,
        _host: &dyn Host,
        _machine: MachineId,
        _now: TimePoint,
    ) -> Result<Option<TimePoint>, EngineError> {
        Ok(None)
    }

    /// Analyze one machine's timeline starting at the cursor, queuing
    /// actions for anything found.
    fn check(&mut self, ctx: &mut PassContext<'_>, host: &dyn Host) -> Result<(), EngineError>;
}

/// Everything a rule sees during one pass: the machine, its reason and
/// score, a read-only cursor snapshot, queue helpers, the pager, and
/// liveness/cancellation signalling.
///
/// Queue helpers snapshot each action's prior value at queue time against
/// the pending cursor view, so a pass that advances the cursor twice still
/// unwinds exactly.
pub struct PassContext<'a> {
    machine: MachineId,
    rule_key: String,
    marker_key: Option<String>,
    reason: ReasonId,
    score: f64,
    now: TimePoint,
    pending: Cursor,
    log: ActionLog,
    pager: &'a SlicePager,
    liveness: &'a LivenessHandle,
    cancel: &'a AtomicBool,
}

impl<'a> PassContext<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        machine: MachineId,
        rule_key: String,
        marker_key: Option<String>,
        reason: ReasonId,
        score: f64,
        now: TimePoint,
        snapshot: Cursor,
        pager: &'a SlicePager,
        liveness: &'a LivenessHandle,
        cancel: &'a AtomicBool,
    ) -> Self {
        Self {
            machine,
            rule_key,
            marker_key,
            reason,
            score,
            now,
            pending: snapshot,
            log: ActionLog::new(),
            pager,
            liveness,
            cancel,
        }
    }

    pub fn machine(&self) -> MachineId {
        self.machine
    }

    pub fn reason(&self) -> ReasonId {
        self.reason
    }

    pub fn now(&self) -> TimePoint {
        self.now
    }

    /// The cursor date/time as it will stand after the queued actions run.
    pub fn date_time(&self) -> TimePoint {
        self.pending.date_time
    }

    /// The marker as it will stand after the queued actions run.
    pub fn marker(&self) -> Option<&StateValue> {
        self.pending.marker.as_ref()
    }

    pub fn pager(&self) -> &SlicePager {
        self.pager
    }

    pub fn liveness(&self) -> &LivenessHandle {
        self.liveness
    }

    /// Signal that the pass is still making progress.
    pub fn set_active(&self) {
        self.liveness.set_active();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Liveness + cancellation check between slice iterations.
    pub fn checkpoint(&self) -> Result<(), EngineError> {
        self.set_active();
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    /// Queue a raw action.
    pub fn add_delayed_action(&mut self, action: Action) {
        self.log.push(action);
    }

    pub fn queued(&self) -> usize {
        self.log.len()
    }

    /// Queue a cursor advance to `next`.
    pub fn advance_cursor(&mut self, next: TimePoint) {
        let prior = self.pending.date_time;
        self.log.push(Action::AdvanceCursor {
            key: state_key(&self.rule_key, DATE_TIME_KEY),
            next,
            prior,
        });
        self.pending.date_time = next;
    }

    /// Queue a cursor advance that always moves forward: a target at or
    /// behind the pending cursor is bumped one second past it.
    pub fn advance_cursor_at_least(&mut self, target: TimePoint) {
        let next = if target <= self.pending.date_time {
            self.pending.date_time + chrono::Duration::seconds(1)
        } else {
            target
        };
        self.advance_cursor(next);
    }

    /// Queue a marker update. The rule must declare a marker key.
    pub fn set_marker(&mut self, value: StateValue) -> Result<(), EngineError> {
        let Some(sub) = self.marker_key.as_deref() else {
            return Err(EngineError::Config(format!(
                "rule {} queues a marker but declares no marker key",
                self.rule_key
            )));
        };
        let prior = self.pending.marker.clone();
        self.log.push(Action::SetMarker {
            key: state_key(&self.rule_key, sub),
            next: value.clone(),
            prior,
        });
        self.pending.marker = Some(value);
        Ok(())
    }

    /// Queue the rule's reason over `range`.
    pub fn apply_reason(&mut self, range: TimeRange, details: Option<String>) {
        self.apply_reason_with(range, details, None, false);
    }

    /// Queue the rule's reason with dynamic-end and overwrite options.
    pub fn apply_reason_with(
        &mut self,
        range: TimeRange,
        details: Option<String>,
        dynamic: Option<String>,
        overwrite: bool,
    ) {
        self.log.push(Action::ApplyReason {
            range,
            reason: self.reason,
            score: self.score,
            details,
            dynamic,
            overwrite,
        });
    }

    pub(crate) fn into_log(self) -> ActionLog {
        self.log
    }

    /// Paginated ascending scan of the machine's operation slices.
    pub fn scan_operations<V>(
        &self,
        host: &dyn Host,
        range: &TimeRange,
        visit: V,
    ) -> Result<(), EngineError>
    where
        V: FnMut(
            crate::host::TimedSlice<crate::host::OperationSlice>,
        ) -> Result<std::ops::ControlFlow<()>, EngineError>,
    {
        self.pager.for_each(
            range,
            self.liveness,
            |window, limit| host.operation_slices(self.machine, window, limit),
            visit,
        )
    }

    /// Paginated ascending scan of the machine's activity slices.
    pub fn scan_activity<V>(
        &self,
        host: &dyn Host,
        range: &TimeRange,
        visit: V,
    ) -> Result<(), EngineError>
    where
        V: FnMut(
            crate::host::TimedSlice<crate::host::ActivitySlice>,
        ) -> Result<std::ops::ControlFlow<()>, EngineError>,
    {
        self.pager.for_each(
            range,
            self.liveness,
            |window, limit| host.activity_slices(self.machine, window, limit),
            visit,
        )
    }
}
