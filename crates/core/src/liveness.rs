//! Checked-liveness signalling between long-running passes and an external
//! thread-health supervisor.
//!
//! A pass (or a long `store()` flush) must keep signalling that it is alive;
//! the supervisor force-aborts passes that go quiet. The [`LivenessRelay`]
//! fans one stream of signals out to every registered watcher; composed
//! components receive a single cloneable [`LivenessHandle`] passed through
//! explicitly rather than each holding its own registry of upstream callers.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::error;

use crate::time::TimePoint;

/// Receiver side of liveness signals.
pub trait Liveness: Send + Sync {
    /// The supervised work is still making progress.
    fn set_active(&self);

    /// Suspend liveness checking (e.g. around a blocking call that is
    /// expected to be slow). Nests.
    fn pause_check(&self);

    /// Resume liveness checking after a matching [`pause_check`](Liveness::pause_check).
    fn resume_check(&self);
}

/// Cheap cloneable handle to a liveness receiver; the default handle is a
/// no-op for unsupervised contexts (tests, one-shot tools).
#[derive(Clone, Default)]
pub struct LivenessHandle(Option<Arc<dyn Liveness>>);

impl LivenessHandle {
    pub fn new(inner: Arc<dyn Liveness>) -> Self {
        Self(Some(inner))
    }

    /// A handle that swallows every signal.
    pub fn noop() -> Self {
        Self(None)
    }

    pub fn set_active(&self) {
        if let Some(l) = &self.0 {
            l.set_active();
        }
    }

    pub fn pause_check(&self) {
        if let Some(l) = &self.0 {
            l.pause_check();
        }
    }

    pub fn resume_check(&self) {
        if let Some(l) = &self.0 {
            l.resume_check();
        }
    }
}

impl std::fmt::Debug for LivenessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LivenessHandle")
            .field(&self.0.is_some())
            .finish()
    }
}

/// Thread-safe registry relaying liveness signals to every registered
/// upstream watcher (typically the watchdog thread's per-pass monitors).
///
/// Tracks the pause nesting level itself: resuming below zero means a
/// `resume_check` without a matching pause, which would silently disable
/// supervision — that is a fatal invariant violation.
#[derive(Default)]
pub struct LivenessRelay {
    callers: RwLock<Vec<Arc<dyn Liveness>>>,
    pause_depth: AtomicI64,
    last_active: RwLock<Option<TimePoint>>,
}

impl LivenessRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an upstream watcher to receive every signal.
    pub fn add_checked_caller(&self, caller: Arc<dyn Liveness>) {
        self.callers
            .write()
            .expect("liveness relay lock poisoned")
            .push(caller);
    }

    /// Unregister a previously added watcher (matched by identity).
    pub fn remove_checked_caller(&self, caller: &Arc<dyn Liveness>) {
        self.callers
            .write()
            .expect("liveness relay lock poisoned")
            .retain(|c| !Arc::ptr_eq(c, caller));
    }

    /// Number of registered watchers.
    pub fn caller_count(&self) -> usize {
        self.callers
            .read()
            .expect("liveness relay lock poisoned")
            .len()
    }

    /// When the relay last saw activity, if ever.
    pub fn last_active(&self) -> Option<TimePoint> {
        *self
            .last_active
            .read()
            .expect("liveness relay lock poisoned")
    }

    /// Whether checking is currently paused.
    pub fn is_paused(&self) -> bool {
        self.pause_depth.load(Ordering::SeqCst) > 0
    }

    /// A handle broadcasting through this relay.
    pub fn handle(self: &Arc<Self>) -> LivenessHandle {
        LivenessHandle::new(Arc::clone(self) as Arc<dyn Liveness>)
    }

    fn broadcast(&self, f: impl Fn(&dyn Liveness)) {
        let callers = self.callers.read().expect("liveness relay lock poisoned");
        for caller in callers.iter() {
            f(caller.as_ref());
        }
    }
}

impl Liveness for LivenessRelay {
    fn set_active(&self) {
        *self
            .last_active
            .write()
            .expect("liveness relay lock poisoned") = Some(chrono::Utc::now());
        self.broadcast(|c| c.set_active());
    }

    fn pause_check(&self) {
        self.pause_depth.fetch_add(1, Ordering::SeqCst);
        self.broadcast(|c| c.pause_check());
    }

    fn resume_check(&self) {
        let prev = self.pause_depth.fetch_sub(1, Ordering::SeqCst);
        if prev <= 0 {
            error!(depth = prev - 1, "liveness resume without matching pause");
            panic!("liveness resume without matching pause");
        }
        self.broadcast(|c| c.resume_check());
    }
}
