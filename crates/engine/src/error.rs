use thiserror::Error;

/// Error taxonomy for the analysis engine.
///
/// `Config` and `Invariant` are fatal: the former rejects a rule or engine
/// at initialization, the latter means continuing could corrupt the
/// persisted cursor. `Persistence` and `Cancelled` are transient: the pass
/// unwinds its queued actions and retries on the next tick.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("pass cancelled")]
    Cancelled,

    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl EngineError {
    /// Whether this error must abort instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Config(_) | EngineError::Invariant(_))
    }

    /// Whether the pass may simply retry on the next tick.
    pub fn is_transient(&self) -> bool {
        !self.is_fatal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_split() {
        assert!(EngineError::Config("bad".into()).is_fatal());
        assert!(EngineError::Invariant("broken".into()).is_fatal());
        assert!(EngineError::Persistence("timeout".into()).is_transient());
        assert!(EngineError::Cancelled.is_transient());
    }
}
