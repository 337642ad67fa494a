//! Trait seams to the host system: the read-only timeline, the key/value
//! cursor store, the transactional unit of work and the reason sink.
//!
//! The production host backs these with the persistence layer; tests and
//! the worker binary use [`MemoryHost`](crate::memory::MemoryHost).

use autoreason_core::{MachineId, OperationId, ReasonId, TimePoint, TimeRange};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// A persisted scalar in the cursor store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StateValue {
    Timestamp(TimePoint),
    Integer(i64),
    Text(String),
}

impl StateValue {
    pub fn as_timestamp(&self) -> Option<TimePoint> {
        match self {
            StateValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            StateValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<TimePoint> for StateValue {
    fn from(t: TimePoint) -> Self {
        StateValue::Timestamp(t)
    }
}

impl From<i64> for StateValue {
    fn from(i: i64) -> Self {
        StateValue::Integer(i)
    }
}

impl From<OperationId> for StateValue {
    fn from(op: OperationId) -> Self {
        StateValue::Integer(op.0)
    }
}

/// One time-ranged record returned by a timeline query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedSlice<D> {
    pub range: TimeRange,
    pub data: D,
}

/// Activity recorded for a machine over a slice of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivitySlice {
    pub running: bool,
}

/// An operation recorded on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSlice {
    pub operation: OperationId,
}

/// Read-only paginated slice queries over one machine's timeline.
///
/// Results are ordered by ascending range and truncated at `limit`; callers
/// scan forward through [`SlicePager`](crate::pager::SlicePager) rather than
/// loading the full history at once.
pub trait Timeline {
    fn activity_slices(
        &self,
        machine: MachineId,
        range: &TimeRange,
        limit: usize,
    ) -> Result<Vec<TimedSlice<ActivitySlice>>, EngineError>;

    fn operation_slices(
        &self,
        machine: MachineId,
        range: &TimeRange,
        limit: usize,
    ) -> Result<Vec<TimedSlice<OperationSlice>>, EngineError>;
}

/// Per-machine key/value cursor store.
pub trait StateStore {
    fn get_state(&self, machine: MachineId, key: &str) -> Result<Option<StateValue>, EngineError>;

    fn save_state(
        &self,
        machine: MachineId,
        key: &str,
        value: StateValue,
    ) -> Result<(), EngineError>;

    fn remove_state(&self, machine: MachineId, key: &str) -> Result<(), EngineError>;
}

/// Transactional unit of work wrapping one commit step.
pub trait UnitOfWork {
    fn begin(&self, label: &str) -> Result<(), EngineError>;

    fn commit(&self) -> Result<(), EngineError>;

    fn rollback(&self) -> Result<(), EngineError>;
}

/// The persisted effect of a domain action: apply a labeled reason to a
/// time range. Must be called inside an open transaction.
pub trait ReasonSink {
    #[allow(clippy::too_many_arguments)]
    fn apply_reason(
        &self,
        machine: MachineId,
        range: &TimeRange,
        reason: ReasonId,
        score: f64,
        details: Option<&str>,
        dynamic: Option<&str>,
        overwrite: bool,
    ) -> Result<(), EngineError>;
}

/// Everything the engine consumes from the host.
pub trait Host: Timeline + StateStore + UnitOfWork + ReasonSink + Send + Sync {}

impl<T: Timeline + StateStore + UnitOfWork + ReasonSink + Send + Sync> Host for T {}
