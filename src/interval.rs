//! Interval algebra over a cluster's power-on schedule.
//!
//! A [`Schedule`] is a sorted set of pairwise disjoint, non-degenerate
//! [`TimeWindow`]s. Windows are half-open `[from, to)`: two windows that
//! merely touch at an instant do not intersect, but [`Schedule::include`]
//! merges them into one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedError};

/// A span of time during which a cluster should be powered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// A window must cover a positive span of time.
    pub fn is_degenerate(&self) -> bool {
        self.from >= self.to
    }
}

/// The full set of power-on windows for one cluster.
///
/// Invariant: windows are sorted ascending by `from`, pairwise disjoint,
/// and none has zero or negative duration. All operations preserve it,
/// and deserialization goes through [`Schedule::new`] so documents cannot
/// smuggle in windows that violate it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Schedule(Vec<TimeWindow>);

impl<'de> Deserialize<'de> for Schedule {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let windows = Vec::<TimeWindow>::deserialize(deserializer)?;
        Schedule::new(windows).map_err(serde::de::Error::custom)
    }
}

impl Schedule {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build a schedule from arbitrary windows, sorting them and rejecting
    /// degenerate or overlapping spans.
    pub fn new(mut windows: Vec<TimeWindow>) -> Result<Self> {
        windows.sort_by_key(|w| w.from);
        for w in &windows {
            if w.is_degenerate() {
                return Err(SchedError::InvariantViolation(format!(
                    "window {} -> {} has non-positive duration",
                    w.from, w.to
                )));
            }
        }
        for pair in windows.windows(2) {
            if pair[1].from < pair[0].to {
                return Err(SchedError::InvariantViolation(format!(
                    "windows {} -> {} and {} -> {} overlap",
                    pair[0].from, pair[0].to, pair[1].from, pair[1].to
                )));
            }
        }
        Ok(Self(windows))
    }

    pub fn windows(&self) -> &[TimeWindow] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Remove `range` from every window, truncating, splitting or dropping
    /// windows as required.
    pub fn exclude(&self, range: TimeWindow) -> Result<Schedule> {
        check_range(range)?;

        let mut result = Vec::with_capacity(self.0.len() + 1);
        for &w in &self.0 {
            // Window entirely before the excluded range
            if w.to <= range.from {
                result.push(w);
            }
            // Window entirely after the excluded range
            else if range.to <= w.from {
                result.push(w);
            }
            // Only the tail of the window falls inside the range
            else if w.from < range.from && w.to <= range.to {
                result.push(TimeWindow::new(w.from, range.from));
            }
            // Only the head of the window falls inside the range
            else if range.from <= w.from && range.to < w.to {
                result.push(TimeWindow::new(range.to, w.to));
            }
            // The range fully contains the window
            else if range.from <= w.from && w.to <= range.to {
                // Window dropped
            }
            // The window fully contains the range
            else if w.from < range.from && range.to < w.to {
                result.push(TimeWindow::new(w.from, range.from));
                result.push(TimeWindow::new(range.to, w.to));
            } else {
                return Err(SchedError::InvariantViolation(format!(
                    "unreachable interval relation: window {} -> {} vs range {} -> {}",
                    w.from, w.to, range.from, range.to
                )));
            }
        }
        Ok(Schedule(result))
    }

    /// Insert `range`, merging with every window it touches or overlaps.
    /// Bridging across several existing windows collapses them all into one.
    pub fn include(&self, range: TimeWindow) -> Result<Schedule> {
        check_range(range)?;

        let mut result = Vec::with_capacity(self.0.len() + 1);
        let mut merged = range;
        let mut placed = false;
        for &w in &self.0 {
            if w.to < merged.from {
                // Strictly before the merged span, not even touching
                result.push(w);
            } else if merged.to < w.from {
                if !placed {
                    result.push(merged);
                    placed = true;
                }
                result.push(w);
            } else {
                // Touches or overlaps: absorb into the merged span
                merged.from = merged.from.min(w.from);
                merged.to = merged.to.max(w.to);
            }
        }
        if !placed {
            result.push(merged);
        }
        Ok(Schedule(result))
    }

    /// True iff a single window contains `range` entirely.
    pub fn is_fully_covered(&self, range: TimeWindow) -> bool {
        self.0
            .iter()
            .any(|w| w.from <= range.from && range.to <= w.to)
    }

    /// True iff no window intersects `range` at all. Windows that merely
    /// touch `range` at a boundary instant do not count as intersecting.
    pub fn is_fully_uncovered(&self, range: TimeWindow) -> bool {
        self.0
            .iter()
            .all(|w| w.to <= range.from || range.to <= w.from)
    }
}

fn check_range(range: TimeWindow) -> Result<()> {
    if range.is_degenerate() {
        return Err(SchedError::InvariantViolation(format!(
            "range {} -> {} has non-positive duration",
            range.from, range.to
        )));
    }
    Ok(())
}
