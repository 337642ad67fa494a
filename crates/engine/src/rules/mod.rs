//! Example detection rules built on the public rule surface.
//!
//! These are consumers of the engine interfaces, exercised by the tests and
//! the worker binary; the production rule set is loaded by the host.

pub mod between_operations;
pub mod long_idle;

pub use between_operations::BetweenOperations;
pub use long_idle::LongIdle;
