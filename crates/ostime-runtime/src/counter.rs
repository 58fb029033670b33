//! Hardware tick counter sources.
//!
//! The reader never touches a register directly; it is handed a
//! [`TickCounter`] capability instead:
//! - [`HostCounter`] derives a wrapping 32-bit count from the host monotonic clock
//! - [`ManualCounter`] is driven explicitly, for tests and simulations

use ostime_common::time::{OsTime, TickRate};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A free-running, read-only 32-bit tick counter that wraps at 2^32.
pub trait TickCounter: Send + Sync {
    /// Sample the counter once.
    fn read(&self) -> u32;
}

impl<T: TickCounter + ?Sized> TickCounter for Arc<T> {
    #[inline]
    fn read(&self) -> u32 {
        (**self).read()
    }
}

impl<T: TickCounter + ?Sized> TickCounter for &T {
    #[inline]
    fn read(&self) -> u32 {
        (**self).read()
    }
}

/// Counter backed by the host monotonic clock.
#[derive(Debug, Clone)]
pub struct HostCounter {
    origin: Instant,
    rate: TickRate,
    start: u32,
}

impl HostCounter {
    /// Create a counter running at `rate` that reads `start` right now.
    #[must_use]
    pub fn new(rate: TickRate, start: u32) -> Self {
        Self {
            origin: Instant::now(),
            rate,
            start,
        }
    }

    /// Counter frequency.
    #[must_use]
    pub fn rate(&self) -> TickRate {
        self.rate
    }
}

impl TickCounter for HostCounter {
    #[inline]
    fn read(&self) -> u32 {
        let ticks = OsTime::from_duration(self.origin.elapsed(), self.rate).ticks();
        // Truncation to the low 32 bits is the hardware wrap.
        self.start.wrapping_add(ticks as u32)
    }
}

type ReadHook = Box<dyn Fn(u32) + Send + Sync>;

/// Counter whose value is set by the caller.
///
/// An optional read hook runs after every sample, which lets a test inject
/// an "interrupt" in the middle of a clock read.
pub struct ManualCounter {
    value: AtomicU32,
    on_read: Option<ReadHook>,
}

impl fmt::Debug for ManualCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualCounter")
            .field("value", &self.value.load(Ordering::Relaxed))
            .field("on_read", &self.on_read.is_some())
            .finish()
    }
}

impl ManualCounter {
    /// Create a counter holding `value`.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Self {
            value: AtomicU32::new(value),
            on_read: None,
        }
    }

    /// Create a counter that calls `hook` with every sampled value.
    #[must_use]
    pub fn with_read_hook<F>(value: u32, hook: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        Self {
            value: AtomicU32::new(value),
            on_read: Some(Box::new(hook)),
        }
    }

    /// Set the counter value.
    pub fn set(&self, value: u32) {
        self.value.store(value, Ordering::SeqCst);
    }

    /// Advance the counter by `ticks`, wrapping at 2^32. Returns the new value.
    pub fn advance(&self, ticks: u32) -> u32 {
        self.value.fetch_add(ticks, Ordering::SeqCst).wrapping_add(ticks)
    }

    /// Current value without running the read hook.
    #[must_use]
    pub fn peek(&self) -> u32 {
        self.value.load(Ordering::SeqCst)
    }
}

impl TickCounter for ManualCounter {
    fn read(&self) -> u32 {
        let sample = self.value.load(Ordering::SeqCst);
        if let Some(hook) = &self.on_read {
            hook(sample);
        }
        sample
    }
}
