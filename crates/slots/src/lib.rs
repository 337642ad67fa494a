//! Interval-value store for machine timelines.
//!
//! This crate provides:
//! - [`SlotAccumulator`] — merges, splits and purges time-ranged values over
//!   an unbounded timeline while preserving exact boundary invariants
//! - [`ChangeTracker`] — a value wrapper modelling an interval's lifecycle
//!   (insert / update / delete) so net no-op changes can be purged before
//!   they are flushed to the persistent store

pub mod accumulator;
pub mod change;

pub use accumulator::{SlotAccumulator, SlotEntry, SlotFold, SlotWriter};
pub use change::{ChangeFold, ChangeTracker};
