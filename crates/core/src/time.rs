//! Time axis model: half-open ranges over UTC instants, possibly unbounded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// An instant on the time axis.
pub type TimePoint = DateTime<Utc>;

/// A half-open interval `[lower, upper)` on the time axis.
///
/// Either bound may be unbounded (`None`). Invariant: when both bounds are
/// present, `lower <= upper`; constructing a range that violates it is a
/// caller usage error and panics. A bounded range with `lower == upper` is
/// empty and carries no value.
///
/// Operations that can yield "no range" (`intersect`, an accumulator's
/// global range) return `Option<TimeRange>` instead of an empty sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    lower: Option<TimePoint>,
    upper: Option<TimePoint>,
}

impl TimeRange {
    /// Build a range from optional bounds. Panics if `lower > upper`.
    pub fn new(lower: Option<TimePoint>, upper: Option<TimePoint>) -> Self {
        Self::try_new(lower, upper).expect("invalid time range")
    }

    /// Fallible variant of [`new`](TimeRange::new).
    pub fn try_new(lower: Option<TimePoint>, upper: Option<TimePoint>) -> Result<Self, CoreError> {
        if let (Some(l), Some(u)) = (lower, upper) {
            if l > u {
                return Err(CoreError::InvalidRange(format!("{} > {}", l, u)));
            }
        }
        Ok(Self { lower, upper })
    }

    /// `[start, end)` with both bounds present. Panics if `start > end`.
    pub fn between(start: TimePoint, end: TimePoint) -> Self {
        Self::new(Some(start), Some(end))
    }

    /// `[start, +inf)`.
    pub fn from(start: TimePoint) -> Self {
        Self {
            lower: Some(start),
            upper: None,
        }
    }

    /// `(-inf, end)`.
    pub fn until(end: TimePoint) -> Self {
        Self {
            lower: None,
            upper: Some(end),
        }
    }

    /// The whole time axis.
    pub fn all() -> Self {
        Self {
            lower: None,
            upper: None,
        }
    }

    pub fn lower(&self) -> Option<TimePoint> {
        self.lower
    }

    pub fn upper(&self) -> Option<TimePoint> {
        self.upper
    }

    /// A bounded range with `lower == upper` covers nothing.
    pub fn is_empty(&self) -> bool {
        matches!((self.lower, self.upper), (Some(l), Some(u)) if l == u)
    }

    /// Whether `t` falls inside `[lower, upper)`.
    pub fn contains(&self, t: TimePoint) -> bool {
        self.lower.map_or(true, |l| l <= t) && self.upper.map_or(true, |u| t < u)
    }

    /// The overlap of two ranges, or `None` when they share no instant.
    pub fn intersect(&self, other: &TimeRange) -> Option<TimeRange> {
        let lower = match (self.lower, other.lower) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        let upper = match (self.upper, other.upper) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        match (lower, upper) {
            (Some(l), Some(u)) if l >= u => None,
            _ => Some(TimeRange { lower, upper }),
        }
    }

    /// Whether `self` lies entirely left of `other` (touching is allowed
    /// since ranges are half-open).
    pub fn strictly_before(&self, other: &TimeRange) -> bool {
        match (self.upper, other.lower) {
            (Some(u), Some(l)) => u <= l,
            _ => false,
        }
    }

    /// The bounded length of the range, `None` when either side is unbounded.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.lower, self.upper) {
            (Some(l), Some(u)) => Some(u - l),
            _ => None,
        }
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.lower {
            Some(l) => write!(f, "[{}, ", l.to_rfc3339())?,
            None => write!(f, "(-inf, ")?,
        }
        match self.upper {
            Some(u) => write!(f, "{})", u.to_rfc3339()),
            None => write!(f, "+inf)"),
        }
    }
}
