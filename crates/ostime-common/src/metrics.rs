//! Rebase statistics.
//!
//! Tracks the gap between consecutive rebases in counter ticks so the
//! remaining headroom against a counter wrap can be monitored.

use crate::time::{TickRate, COUNTER_PERIOD};
use serde::Serialize;
use std::time::Duration;

/// Gap statistics for a sequence of rebases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RebaseStats {
    /// Number of rebases recorded.
    pub count: u64,
    /// Most recent gap in ticks.
    pub last_gap: u32,
    /// Smallest gap observed in ticks.
    pub min_gap: u32,
    /// Largest gap observed in ticks.
    pub max_gap: u32,
}

impl Default for RebaseStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RebaseStats {
    /// Create an empty statistics record.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: 0,
            last_gap: 0,
            min_gap: u32::MAX,
            max_gap: 0,
        }
    }

    /// Record the ticks that elapsed since the previous rebase.
    pub fn record(&mut self, gap: u32) {
        self.count += 1;
        self.last_gap = gap;
        self.min_gap = self.min_gap.min(gap);
        self.max_gap = self.max_gap.max(gap);
    }

    /// Smallest gap, or `None` before the first rebase.
    #[must_use]
    pub fn min_gap(&self) -> Option<u32> {
        (self.count > 0).then_some(self.min_gap)
    }

    /// Ticks left before the worst observed gap would reach a full wrap.
    #[must_use]
    pub fn headroom_ticks(&self) -> u64 {
        COUNTER_PERIOD - u64::from(self.max_gap)
    }

    /// Worst observed gap as a wall duration.
    #[must_use]
    pub fn max_gap_duration(&self, rate: TickRate) -> Duration {
        crate::time::OsTime(u64::from(self.max_gap)).to_duration(rate)
    }

    /// Whether the worst gap used more than half of the wrap period.
    #[must_use]
    pub fn is_near_wrap(&self) -> bool {
        u64::from(self.max_gap) > COUNTER_PERIOD / 2
    }
}
