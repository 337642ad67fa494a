//! Resumable auto-reason analysis over machine timelines.
//!
//! This crate provides:
//! - Host trait seams for the timeline, cursor store, transactions and the
//!   reason sink ([`host`])
//! - The reversible delayed-action log ([`action`])
//! - Per (machine, rule) cursor semantics ([`cursor`])
//! - The rule surface and pass context ([`rule`])
//! - The pass driver with commit/rollback semantics ([`driver`])
//! - The per-machine analysis engine loop ([`engine`])
//! - An in-memory host for tests and the worker binary ([`memory`])

pub mod action;
pub mod cursor;
pub mod driver;
pub mod engine;
pub mod error;
pub mod host;
pub mod memory;
pub mod pager;
pub mod rule;
pub mod rules;

pub use action::{Action, ActionLog};
pub use cursor::Cursor;
pub use driver::{PassOutcome, PassPhase, RuleDriver};
pub use engine::{AnalysisEngine, TickSummary};
pub use error::EngineError;
pub use host::{
    ActivitySlice, Host, OperationSlice, ReasonSink, StateStore, StateValue, TimedSlice, Timeline,
    UnitOfWork,
};
pub use memory::{AppliedReason, MemoryHost};
pub use pager::SlicePager;
pub use rule::{AutoReasonRule, PassContext};
