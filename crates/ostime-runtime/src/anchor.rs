//! Synchronisation of the base pair.
//!
//! The counter sample and both halves of the anchor must be observed as a
//! single unit with respect to the writer that re-anchors the clock.
//! Two disciplines are provided:
//!
//! - [`MaskedAnchor`]: disable interrupts on the calling core. Correct only
//!   when the writer is an interrupt handler on that same core.
//! - [`SpinAnchor`]: a spin lock around the sample and the pair. Correct
//!   across cores and threads, but must never be taken by a handler that can
//!   preempt a holder on the same core.

use crate::counter::TickCounter;
use crate::interrupt::{InterruptController, InterruptGuard};
use crossbeam_utils::CachePadded;
use ostime_common::config::SyncStrategy;
use ostime_common::time::{elapsed_ticks, Anchor, OsTime};
use spin::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Outcome of an anchor update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorUpdate {
    /// Counter sample taken inside the update.
    pub sample: u32,
    /// Anchor before the update.
    pub previous: Anchor,
    /// Anchor installed by the update.
    pub current: Anchor,
}

impl AnchorUpdate {
    /// Ticks between the previous anchor and the sample.
    #[must_use]
    pub fn gap(&self) -> u32 {
        elapsed_ticks(self.sample, self.previous.counter)
    }
}

/// Storage for the base pair with an atomic observe/update discipline.
pub trait AnchorStore: Send + Sync {
    /// Sample `counter` and read the pair as one observation.
    fn observe<C: TickCounter + ?Sized>(&self, counter: &C) -> (u32, Anchor);

    /// Sample `counter` and install `f(sample, current)` as one step.
    fn update<C, F>(&self, counter: &C, f: F) -> AnchorUpdate
    where
        C: TickCounter + ?Sized,
        F: FnOnce(u32, Anchor) -> Anchor;

    /// Snapshot of the pair alone.
    fn load(&self) -> Anchor;

    /// Discipline that keeps readers and writers apart.
    fn strategy(&self) -> SyncStrategy;
}

impl<S: AnchorStore> AnchorStore for std::sync::Arc<S> {
    #[inline]
    fn observe<C: TickCounter + ?Sized>(&self, counter: &C) -> (u32, Anchor) {
        (**self).observe(counter)
    }

    #[inline]
    fn update<C, F>(&self, counter: &C, f: F) -> AnchorUpdate
    where
        C: TickCounter + ?Sized,
        F: FnOnce(u32, Anchor) -> Anchor,
    {
        (**self).update(counter, f)
    }

    #[inline]
    fn load(&self) -> Anchor {
        (**self).load()
    }

    fn strategy(&self) -> SyncStrategy {
        (**self).strategy()
    }
}

/// Base pair guarded by masking interrupts on the calling core.
pub struct MaskedAnchor<I: InterruptController> {
    interrupts: I,
    counter: AtomicU32,
    time: AtomicU64,
}

impl<I: InterruptController> fmt::Debug for MaskedAnchor<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaskedAnchor")
            .field("anchor", &self.read_pair())
            .finish_non_exhaustive()
    }
}

impl<I: InterruptController> MaskedAnchor<I> {
    /// Create a store holding `anchor`, masked through `interrupts`.
    pub fn new(interrupts: I, anchor: Anchor) -> Self {
        Self {
            interrupts,
            counter: AtomicU32::new(anchor.counter),
            time: AtomicU64::new(anchor.time.ticks()),
        }
    }

    /// The interrupt controller used for masking.
    pub fn interrupts(&self) -> &I {
        &self.interrupts
    }

    #[inline]
    fn read_pair(&self) -> Anchor {
        Anchor::new(
            self.counter.load(Ordering::Acquire),
            OsTime(self.time.load(Ordering::Acquire)),
        )
    }

    #[inline]
    fn write_pair(&self, anchor: Anchor) {
        self.counter.store(anchor.counter, Ordering::Release);
        self.time.store(anchor.time.ticks(), Ordering::Release);
    }
}

impl<I: InterruptController> AnchorStore for MaskedAnchor<I> {
    #[inline]
    fn observe<C: TickCounter + ?Sized>(&self, counter: &C) -> (u32, Anchor) {
        let _guard = InterruptGuard::new(&self.interrupts);
        let sample = counter.read();
        (sample, self.read_pair())
    }

    fn update<C, F>(&self, counter: &C, f: F) -> AnchorUpdate
    where
        C: TickCounter + ?Sized,
        F: FnOnce(u32, Anchor) -> Anchor,
    {
        let _guard = InterruptGuard::new(&self.interrupts);
        let sample = counter.read();
        let previous = self.read_pair();
        let current = f(sample, previous);
        self.write_pair(current);
        AnchorUpdate {
            sample,
            previous,
            current,
        }
    }

    fn load(&self) -> Anchor {
        let _guard = InterruptGuard::new(&self.interrupts);
        self.read_pair()
    }

    fn strategy(&self) -> SyncStrategy {
        SyncStrategy::InterruptMask
    }
}

/// Base pair guarded by a spin lock.
pub struct SpinAnchor {
    anchor: CachePadded<Mutex<Anchor>>,
}

impl fmt::Debug for SpinAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinAnchor")
            .field("anchor", &*self.anchor.lock())
            .finish()
    }
}

impl SpinAnchor {
    /// Create a store holding `anchor`.
    #[must_use]
    pub fn new(anchor: Anchor) -> Self {
        Self {
            anchor: CachePadded::new(Mutex::new(anchor)),
        }
    }
}

impl AnchorStore for SpinAnchor {
    #[inline]
    fn observe<C: TickCounter + ?Sized>(&self, counter: &C) -> (u32, Anchor) {
        let guard = self.anchor.lock();
        let sample = counter.read();
        (sample, *guard)
    }

    fn update<C, F>(&self, counter: &C, f: F) -> AnchorUpdate
    where
        C: TickCounter + ?Sized,
        F: FnOnce(u32, Anchor) -> Anchor,
    {
        let mut guard = self.anchor.lock();
        let sample = counter.read();
        let previous = *guard;
        let current = f(sample, previous);
        *guard = current;
        AnchorUpdate {
            sample,
            previous,
            current,
        }
    }

    fn load(&self) -> Anchor {
        *self.anchor.lock()
    }

    fn strategy(&self) -> SyncStrategy {
        SyncStrategy::Spinlock
    }
}

/// Interrupt line used by host builds for [`SyncStrategy::InterruptMask`](ostime_common::config::SyncStrategy).
#[cfg(unix)]
pub type HostInterrupts = crate::interrupt::SignalInterrupts;

/// Interrupt line used by host builds for [`SyncStrategy::InterruptMask`](ostime_common::config::SyncStrategy).
#[cfg(not(unix))]
pub type HostInterrupts = crate::interrupt::SimulatedInterrupts;

/// Anchor store selected at runtime from configuration.
#[derive(Debug)]
pub enum ConfiguredAnchor {
    /// Spin lock discipline.
    Spin(SpinAnchor),
    /// Interrupt mask discipline on the host interrupt line.
    Masked(MaskedAnchor<HostInterrupts>),
}

impl AnchorStore for ConfiguredAnchor {
    #[inline]
    fn observe<C: TickCounter + ?Sized>(&self, counter: &C) -> (u32, Anchor) {
        match self {
            Self::Spin(store) => store.observe(counter),
            Self::Masked(store) => store.observe(counter),
        }
    }

    fn update<C, F>(&self, counter: &C, f: F) -> AnchorUpdate
    where
        C: TickCounter + ?Sized,
        F: FnOnce(u32, Anchor) -> Anchor,
    {
        match self {
            Self::Spin(store) => store.update(counter, f),
            Self::Masked(store) => store.update(counter, f),
        }
    }

    fn load(&self) -> Anchor {
        match self {
            Self::Spin(store) => store.load(),
            Self::Masked(store) => store.load(),
        }
    }

    fn strategy(&self) -> SyncStrategy {
        match self {
            Self::Spin(store) => store.strategy(),
            Self::Masked(store) => store.strategy(),
        }
    }
}

static_assertions::assert_impl_all!(SpinAnchor: Send, Sync);
static_assertions::assert_impl_all!(ConfiguredAnchor: Send, Sync);
static_assertions::assert_impl_all!(MaskedAnchor<crate::interrupt::SimulatedInterrupts>: Send, Sync);
