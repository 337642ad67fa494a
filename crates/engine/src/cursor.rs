//! Per (machine, rule) cursor: the persisted resume point of a forward-only
//! scan, loaded as an immutable snapshot at pass start and mutated only
//! through the delayed action log.

use autoreason_core::{MachineId, TimePoint};

use crate::error::EngineError;
use crate::host::{Host, StateValue};

/// Sub-key under which every rule persists its date/time cursor field.
pub const DATE_TIME_KEY: &str = "DateTime";

/// Compose the cursor-store key for a rule's sub-key.
pub fn state_key(rule_key: &str, sub_key: &str) -> String {
    format!("{}.{}", rule_key, sub_key)
}

/// In-memory cursor state for one (machine, rule) pair: the date/time the
/// scan resumes from, plus an optional correlated marker (e.g. the id of the
/// previously seen operation).
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub date_time: TimePoint,
    pub marker: Option<StateValue>,
}

impl Cursor {
    pub fn new(date_time: TimePoint) -> Self {
        Self {
            date_time,
            marker: None,
        }
    }

    /// Load the persisted cursor, or `None` when the rule never ran on this
    /// machine. A cursor field of the wrong type means the store was
    /// corrupted outside this engine, which is fatal.
    pub fn load(
        host: &dyn Host,
        machine: MachineId,
        rule_key: &str,
        marker_key: Option<&str>,
    ) -> Result<Option<Cursor>, EngineError> {
        let Some(raw) = host.get_state(machine, &state_key(rule_key, DATE_TIME_KEY))? else {
            return Ok(None);
        };
        let Some(date_time) = raw.as_timestamp() else {
            return Err(EngineError::Invariant(format!(
                "cursor {} of machine {} holds a non-timestamp value",
                state_key(rule_key, DATE_TIME_KEY),
                machine
            )));
        };
        let marker = match marker_key {
            Some(sub) => host.get_state(machine, &state_key(rule_key, sub))?,
            None => None,
        };
        Ok(Some(Cursor { date_time, marker }))
    }
}
