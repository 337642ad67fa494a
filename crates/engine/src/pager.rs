//! Windowed, ascending pagination over timeline slice queries.
//!
//! A pass never loads the full history at once: it walks the scan range in
//! windows of a configurable step, fetching at most a page of slices per
//! query and signalling liveness between windows. Both step and page size
//! are tunables, not fixed constants.

use std::ops::ControlFlow;

use autoreason_core::{EngineConfig, LivenessHandle, TimePoint, TimeRange};
use tracing::warn;

use crate::error::EngineError;
use crate::host::TimedSlice;

#[derive(Debug, Clone)]
pub struct SlicePager {
    scan_step: chrono::Duration,
    page_size: usize,
}

impl SlicePager {
    /// Both parameters must be positive; anything else is a configuration
    /// error.
    pub fn new(scan_step: chrono::Duration, page_size: usize) -> Result<Self, EngineError> {
        if scan_step <= chrono::Duration::zero() {
            return Err(EngineError::Config(format!(
                "scan step must be positive, got {}",
                scan_step
            )));
        }
        if page_size == 0 {
            return Err(EngineError::Config("page size must be positive".into()));
        }
        Ok(Self {
            scan_step,
            page_size,
        })
    }

    /// Build from engine config, falling back to defaults on out-of-range
    /// values.
    pub fn from_config(config: &EngineConfig) -> Self {
        match Self::new(config.scan_step(), config.page_size) {
            Ok(pager) => pager,
            Err(e) => {
                warn!(error = %e, "invalid pager configuration, using defaults");
                Self {
                    scan_step: chrono::Duration::hours(24),
                    page_size: 100,
                }
            }
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Walk `range` left to right, invoking `visit` for every slice in
    /// ascending order until it breaks, errors, or the range is exhausted.
    ///
    /// `query` receives a window sub-range and the page limit. Scanning an
    /// unbounded range is a usage error: the caller decides the horizon.
    pub fn for_each<D, Q, V>(
        &self,
        range: &TimeRange,
        liveness: &LivenessHandle,
        query: Q,
        mut visit: V,
    ) -> Result<(), EngineError>
    where
        Q: Fn(&TimeRange, usize) -> Result<Vec<TimedSlice<D>>, EngineError>,
        V: FnMut(TimedSlice<D>) -> Result<ControlFlow<()>, EngineError>,
    {
        let Some(mut cur) = range.lower() else {
            return Err(EngineError::Config(
                "scan range must have a bounded lower end".into(),
            ));
        };
        let Some(end) = range.upper() else {
            return Err(EngineError::Config(
                "scan range must have a bounded upper end".into(),
            ));
        };

        while cur < end {
            liveness.set_active();
            let window_end = (cur + self.scan_step).min(end);
            let window = TimeRange::between(cur, window_end);

            let slices = query(&window, self.page_size)?;
            let full_page = slices.len() == self.page_size;
            let mut last_upper: Option<TimePoint> = None;
            let mut open_ended = false;

            for slice in slices {
                match slice.range.upper() {
                    Some(u) => last_upper = Some(u),
                    None => open_ended = true,
                }
                if let ControlFlow::Break(()) = visit(slice)? {
                    return Ok(());
                }
            }

            if open_ended {
                // Nothing can follow a slice reaching forever.
                break;
            }
            cur = if full_page {
                // More slices may remain inside this window: resume right
                // after the last one seen.
                match last_upper {
                    Some(u) if u > cur => u,
                    _ => window_end,
                }
            } else {
                // A trailing slice may spill past the window; skip what was
                // already visited.
                match last_upper {
                    Some(u) if u > window_end => u,
                    _ => window_end,
                }
            };
        }
        Ok(())
    }

    /// First slice matching `predicate`, scanning ascending.
    pub fn find_first<D, Q, P>(
        &self,
        range: &TimeRange,
        liveness: &LivenessHandle,
        query: Q,
        mut predicate: P,
    ) -> Result<Option<TimedSlice<D>>, EngineError>
    where
        Q: Fn(&TimeRange, usize) -> Result<Vec<TimedSlice<D>>, EngineError>,
        P: FnMut(&TimedSlice<D>) -> bool,
    {
        let mut found = None;
        self.for_each(range, liveness, query, |slice| {
            if predicate(&slice) {
                found = Some(slice);
                Ok(ControlFlow::Break(()))
            } else {
                Ok(ControlFlow::Continue(()))
            }
        })?;
        Ok(found)
    }
}
