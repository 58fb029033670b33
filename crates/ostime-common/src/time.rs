//! Logical time, tick rates and the base anchor.
//!
//! The hardware counter is a free-running 32-bit value that wraps at 2^32.
//! Logical time is a 64-bit tick count obtained by adding the wrapping
//! distance from an anchor sample to the time recorded for that anchor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;
const MICROS_PER_SEC: u128 = 1_000_000;

/// Number of distinct values of the 32-bit hardware counter.
pub const COUNTER_PERIOD: u64 = 1 << 32;

/// Logical time in counter ticks since the clock epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OsTime(pub u64);

impl OsTime {
    /// The clock epoch.
    pub const ZERO: Self = Self(0);

    /// Create a time value from a raw tick count.
    #[must_use]
    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Raw tick count.
    #[must_use]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Add a 32-bit elapsed delta, widened to 64 bits.
    ///
    /// Wraps at 2^64, matching the unsigned arithmetic of the counter domain.
    #[must_use]
    pub const fn wrapping_add_elapsed(self, elapsed: u32) -> Self {
        Self(self.0.wrapping_add(elapsed as u64))
    }

    /// Convert to a wall duration at the given counter rate.
    #[must_use]
    pub fn to_duration(self, rate: TickRate) -> Duration {
        let nanos = rate.cycles_to_nanos(self.0);
        Duration::new(
            (nanos / NANOS_PER_SEC) as u64,
            (nanos % NANOS_PER_SEC) as u32,
        )
    }

    /// Convert a wall duration to ticks at the given counter rate (rounds down).
    #[must_use]
    pub fn from_duration(duration: Duration, rate: TickRate) -> Self {
        Self(rate.nanos_to_cycles(duration.as_nanos()))
    }
}

impl fmt::Display for OsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ticks", self.0)
    }
}

impl From<u64> for OsTime {
    fn from(ticks: u64) -> Self {
        Self(ticks)
    }
}

/// Wrapping distance from `base` to `sample` on the 32-bit counter.
///
/// Correct as long as at most one wrap separates the two samples.
#[inline]
#[must_use]
pub const fn elapsed_ticks(sample: u32, base: u32) -> u32 {
    sample.wrapping_sub(base)
}

/// The base pair: a counter sample and the logical time it corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Anchor {
    /// Hardware counter value when the clock was last re-anchored.
    pub counter: u32,
    /// Logical time at that counter value.
    pub time: OsTime,
}

impl Anchor {
    /// Create an anchor from its two halves.
    #[must_use]
    pub const fn new(counter: u32, time: OsTime) -> Self {
        Self { counter, time }
    }

    /// Logical time for a counter sample taken after this anchor.
    #[inline]
    #[must_use]
    pub const fn time_at(&self, sample: u32) -> OsTime {
        self.time.wrapping_add_elapsed(elapsed_ticks(sample, self.counter))
    }

    /// Move the anchor forward to `sample` without changing the logical
    /// time any later sample maps to.
    #[must_use]
    pub const fn rebased(&self, sample: u32) -> Self {
        Self {
            counter: sample,
            time: self.time_at(sample),
        }
    }
}

/// Frequency of the hardware counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct TickRate(NonZeroU64);

impl TickRate {
    /// CPU counter rate of the reference console: 3/4 of its 62.5 MHz CPU clock.
    pub const DEFAULT_HZ: u64 = 46_875_000;

    /// Create a rate; `None` for zero.
    #[must_use]
    pub const fn new(hz: u64) -> Option<Self> {
        match NonZeroU64::new(hz) {
            Some(hz) => Some(Self(hz)),
            None => None,
        }
    }

    /// Rate in ticks per second.
    #[must_use]
    pub const fn hz(self) -> u64 {
        self.0.get()
    }

    /// Counter ticks to nanoseconds (rounds down).
    #[must_use]
    pub fn cycles_to_nanos(self, cycles: u64) -> u128 {
        u128::from(cycles) * NANOS_PER_SEC / u128::from(self.hz())
    }

    /// Nanoseconds to counter ticks (rounds down, saturates at `u64::MAX`).
    #[must_use]
    pub fn nanos_to_cycles(self, nanos: u128) -> u64 {
        let cycles = nanos.saturating_mul(u128::from(self.hz())) / NANOS_PER_SEC;
        u64::try_from(cycles).unwrap_or(u64::MAX)
    }

    /// Counter ticks to microseconds (rounds down).
    #[must_use]
    pub fn cycles_to_micros(self, cycles: u64) -> u64 {
        let micros = u128::from(cycles) * MICROS_PER_SEC / u128::from(self.hz());
        u64::try_from(micros).unwrap_or(u64::MAX)
    }

    /// Microseconds to counter ticks (rounds down).
    #[must_use]
    pub fn micros_to_cycles(self, micros: u64) -> u64 {
        let cycles = u128::from(micros) * u128::from(self.hz()) / MICROS_PER_SEC;
        u64::try_from(cycles).unwrap_or(u64::MAX)
    }

    /// Time it takes the 32-bit counter to wrap once.
    #[must_use]
    pub fn wrap_period(self) -> Duration {
        OsTime(COUNTER_PERIOD).to_duration(self)
    }
}

impl Default for TickRate {
    fn default() -> Self {
        Self(NonZeroU64::new(Self::DEFAULT_HZ).unwrap_or(NonZeroU64::MIN))
    }
}

impl TryFrom<u64> for TickRate {
    type Error = String;

    fn try_from(hz: u64) -> Result<Self, Self::Error> {
        Self::new(hz).ok_or_else(|| "counter rate must be non-zero".to_string())
    }
}

impl From<TickRate> for u64 {
    fn from(rate: TickRate) -> Self {
        rate.hz()
    }
}

impl fmt::Display for TickRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.hz())
    }
}
