//! "Long idle": a contiguous non-running stretch longer than a configured
//! threshold, bounded by activity on both sides, gets the reason.

use std::ops::ControlFlow;

use autoreason_core::{ReasonId, TimePoint, TimeRange};

use crate::error::EngineError;
use crate::host::Host;
use crate::rule::{AutoReasonRule, PassContext};

pub struct LongIdle {
    reason: ReasonId,
    score: f64,
    min_duration: chrono::Duration,
}

impl LongIdle {
    pub fn new(reason: ReasonId, score: f64, min_duration: chrono::Duration) -> Self {
        Self {
            reason,
            score,
            min_duration,
        }
    }
}

impl AutoReasonRule for LongIdle {
    fn name(&self) -> &str {
        "AutoReason.LongIdle"
    }

    fn reason(&self) -> ReasonId {
        self.reason
    }

    fn score(&self) -> f64 {
        self.score
    }

    fn initialize(
        &mut self,
        _host: &dyn Host,
        _machine: autoreason_core::MachineId,
    ) -> Result<(), EngineError> {
        if self.min_duration <= chrono::Duration::zero() {
            return Err(EngineError::Config(
                "long idle threshold must be positive".into(),
            ));
        }
        Ok(())
    }

    fn check(&mut self, ctx: &mut PassContext<'_>, host: &dyn Host) -> Result<(), EngineError> {
        ctx.checkpoint()?;
        let from = ctx.date_time();
        let horizon = ctx.now();
        if from >= horizon {
            return Ok(());
        }
        let scan = TimeRange::between(from, horizon);

        // Walk the activity slices once, collecting idle stretches that are
        // terminated by a running slice. A data gap breaks a stretch.
        let mut idle_start: Option<TimePoint> = None;
        let mut last_end: Option<TimePoint> = None;
        let mut stretches: Vec<TimeRange> = Vec::new();

        ctx.scan_activity(host, &scan, |slice| {
            let lo = slice.range.lower().map_or(from, |l| l.max(from));
            let hi = slice.range.upper().map_or(horizon, |u| u.min(horizon));
            if lo >= hi {
                return Ok(ControlFlow::Continue(()));
            }
            if let Some(end) = last_end {
                if lo > end {
                    idle_start = None;
                }
            }
            if slice.data.running {
                if let Some(start) = idle_start.take() {
                    if lo - start >= self.min_duration {
                        stretches.push(TimeRange::between(start, lo));
                    }
                }
            } else if idle_start.is_none() {
                idle_start = Some(lo);
            }
            last_end = Some(hi);
            Ok(ControlFlow::Continue(()))
        })?;

        for stretch in &stretches {
            let minutes = stretch
                .duration()
                .map(|d| d.num_minutes())
                .unwrap_or_default();
            ctx.apply_reason(*stretch, Some(format!("Idle for {} min", minutes)));
        }

        // A trailing idle stretch is still open: keep the cursor at its
        // start so the next pass sees the whole stretch.
        let advance_to = match idle_start {
            Some(start) => start,
            None => last_end.unwrap_or(from),
        };
        if advance_to > from {
            ctx.advance_cursor(advance_to);
        }
        Ok(())
    }
}
