//! The pass driver: runs one rule over one machine with crash-safe
//! commit/rollback semantics.
//!
//! One pass: load (or lazily derive) the cursor snapshot, let the rule scan
//! and queue actions, then open one transaction and run every action in
//! order. On any persistence error the already-run actions are reset in
//! reverse order and the in-memory cursor returns to its pre-pass value, so
//! the rule retries on the next tick from the unchanged persisted cursor.

use std::sync::atomic::AtomicBool;

use autoreason_core::{EngineConfig, LivenessHandle, MachineId, TimePoint};
use tracing::{debug, warn};

use crate::action::{Action, ActionLog};
use crate::cursor::{state_key, Cursor, DATE_TIME_KEY};
use crate::error::EngineError;
use crate::host::Host;
use crate::pager::SlicePager;
use crate::rule::{AutoReasonRule, PassContext};

/// Where a rule instance stands in its pass lifecycle. The only terminal
/// state is process shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPhase {
    Uninitialized,
    Scanning,
    Queuing,
    Committing,
    Committed,
    RolledBack,
}

/// What one pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// First run: the initial cursor was derived and persisted.
    Initialized,
    /// The scan found nothing to do.
    NoAction,
    /// All queued actions ran and the transaction committed.
    Committed { actions: usize },
    /// A transient failure unwound the pass; retry next tick.
    RolledBack { error: String },
    /// Cancellation unwound the pass without committing.
    Cancelled,
}

enum CommitResult {
    Committed,
    RolledBack(EngineError),
}

/// Drives one rule on one machine across passes.
pub struct RuleDriver {
    rule: Box<dyn AutoReasonRule>,
    machine: MachineId,
    cursor: Option<Cursor>,
    phase: PassPhase,
    first_run_period: chrono::Duration,
    pager: SlicePager,
    liveness: LivenessHandle,
}

impl RuleDriver {
    pub fn new(
        rule: Box<dyn AutoReasonRule>,
        machine: MachineId,
        config: &EngineConfig,
        liveness: LivenessHandle,
    ) -> Self {
        Self {
            rule,
            machine,
            cursor: None,
            phase: PassPhase::Uninitialized,
            first_run_period: config.first_run_period(),
            pager: SlicePager::from_config(config),
            liveness,
        }
    }

    /// Initialize the rule; a failure is fatal and rejects the rule.
    pub fn initialize(&mut self, host: &dyn Host) -> Result<(), EngineError> {
        self.rule.initialize(host, self.machine)
    }

    pub fn rule_name(&self) -> &str {
        self.rule.name()
    }

    pub fn machine(&self) -> MachineId {
        self.machine
    }

    pub fn phase(&self) -> PassPhase {
        self.phase
    }

    /// The rule's current in-memory cursor, once loaded.
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Run one full pass. Transient failures are reported in the outcome;
    /// only fatal errors propagate.
    pub fn run_pass(
        &mut self,
        host: &dyn Host,
        now: TimePoint,
        cancel: &AtomicBool,
    ) -> Result<PassOutcome, EngineError> {
        self.liveness.set_active();

        // Step 1: cursor snapshot, derived lazily on the very first pass.
        let snapshot = match &self.cursor {
            Some(c) => c.clone(),
            None => {
                let loaded = match Cursor::load(
                    host,
                    self.machine,
                    self.rule.name(),
                    self.rule.marker_key(),
                ) {
                    Ok(loaded) => loaded,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(
                            rule = self.rule.name(),
                            machine = %self.machine,
                            error = %e,
                            "cursor load failed, retrying next tick"
                        );
                        return Ok(PassOutcome::RolledBack {
                            error: e.to_string(),
                        });
                    }
                };
                match loaded {
                    Some(c) => {
                        self.cursor = Some(c.clone());
                        c
                    }
                    None => return self.first_pass(host, now),
                }
            }
        };

        // Steps 2-3: the rule scans and queues; nothing external mutates.
        self.phase = PassPhase::Scanning;
        let mut ctx = PassContext::new(
            self.machine,
            self.rule.name().to_string(),
            self.rule.marker_key().map(str::to_string),
            self.rule.reason(),
            self.rule.score(),
            now,
            snapshot.clone(),
            &self.pager,
            &self.liveness,
            cancel,
        );
        match self.rule.check(&mut ctx, host) {
            Ok(()) => {}
            Err(EngineError::Cancelled) => {
                self.phase = PassPhase::RolledBack;
                debug!(rule = self.rule.name(), machine = %self.machine, "pass cancelled");
                return Ok(PassOutcome::Cancelled);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                self.phase = PassPhase::RolledBack;
                warn!(
                    rule = self.rule.name(),
                    machine = %self.machine,
                    error = %e,
                    "check failed, retrying next tick"
                );
                return Ok(PassOutcome::RolledBack {
                    error: e.to_string(),
                });
            }
        }

        let mut log = ctx.into_log();
        if log.is_empty() {
            return Ok(PassOutcome::NoAction);
        }
        self.phase = PassPhase::Queuing;

        // Cancellation between queuing and commit unwinds exactly like a
        // persistence error, except nothing has run yet.
        if cancel.load(std::sync::atomic::Ordering::Relaxed) {
            self.phase = PassPhase::RolledBack;
            return Ok(PassOutcome::Cancelled);
        }

        // Step 4: one transaction around the whole queue.
        self.phase = PassPhase::Committing;
        let actions = log.len();
        let mut working = snapshot.clone();
        match self.commit(host, &mut working, &mut log) {
            CommitResult::Committed => {
                self.phase = PassPhase::Committed;
                self.cursor = Some(working);
                debug!(
                    rule = self.rule.name(),
                    machine = %self.machine,
                    actions,
                    "pass committed"
                );
                Ok(PassOutcome::Committed { actions })
            }
            CommitResult::RolledBack(e) => {
                debug_assert_eq!(working, snapshot);
                self.phase = PassPhase::RolledBack;
                warn!(
                    rule = self.rule.name(),
                    machine = %self.machine,
                    error = %e,
                    "commit failed, pass unwound"
                );
                Ok(PassOutcome::RolledBack {
                    error: e.to_string(),
                })
            }
        }
    }

    /// First pass on this machine: derive the initial cursor, persist it
    /// through a state action and return. The scan resumes next call.
    fn first_pass(
        &mut self,
        host: &dyn Host,
        now: TimePoint,
    ) -> Result<PassOutcome, EngineError> {
        let initial = match self.rule.initial_cursor(host, self.machine, now) {
            Ok(derived) => derived.unwrap_or_else(|| now - self.first_run_period),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(
                    rule = self.rule.name(),
                    machine = %self.machine,
                    error = %e,
                    "initial cursor derivation failed, retrying next tick"
                );
                return Ok(PassOutcome::RolledBack {
                    error: e.to_string(),
                });
            }
        };
        debug!(
            rule = self.rule.name(),
            machine = %self.machine,
            %initial,
            "first run, initializing cursor"
        );

        let mut cursor = Cursor::new(initial);
        let mut log = ActionLog::new();
        log.push(Action::AdvanceCursor {
            key: state_key(self.rule.name(), DATE_TIME_KEY),
            next: initial,
            prior: initial,
        });

        self.phase = PassPhase::Committing;
        match self.commit(host, &mut cursor, &mut log) {
            CommitResult::Committed => {
                self.phase = PassPhase::Committed;
                self.cursor = Some(cursor);
                Ok(PassOutcome::Initialized)
            }
            CommitResult::RolledBack(e) => {
                // Leave the driver uninitialized so the next pass re-derives.
                self.phase = PassPhase::RolledBack;
                warn!(
                    rule = self.rule.name(),
                    machine = %self.machine,
                    error = %e,
                    "cursor initialization failed, retrying next tick"
                );
                Ok(PassOutcome::RolledBack {
                    error: e.to_string(),
                })
            }
        }
    }

    fn commit(
        &self,
        host: &dyn Host,
        cursor: &mut Cursor,
        log: &mut ActionLog,
    ) -> CommitResult {
        let label = format!("autoreason.{}.commit", self.rule.name());
        if let Err(e) = host.begin(&label) {
            return CommitResult::RolledBack(e);
        }
        let run_result = log.run_all(self.machine, cursor, host);
        match run_result.and_then(|_| host.commit()) {
            Ok(()) => CommitResult::Committed,
            Err(e) => {
                log.reset_all(cursor);
                if let Err(rb) = host.rollback() {
                    warn!(error = %rb, "rollback after failed commit also failed");
                }
                CommitResult::RolledBack(e)
            }
        }
    }
}
