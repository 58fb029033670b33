//! Interrupt mask primitives.
//!
//! A controller hands out an opaque mask when interrupts are disabled and
//! takes it back to reinstate exactly that state. Restoring never enables
//! delivery unconditionally: a caller that already ran with interrupts off
//! keeps them off.
//!
//! - [`SimulatedInterrupts`] models one core with deferred delivery
//! - [`SignalInterrupts`] uses a blocked POSIX signal as the host interrupt line

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::trace;

/// Disable/restore discipline of a single core.
pub trait InterruptController: Send + Sync {
    /// Opaque record of the interrupt state before [`disable`](Self::disable).
    type Mask;

    /// Disable interrupt delivery and return the previous state.
    fn disable(&self) -> Self::Mask;

    /// Reinstate a state previously returned by [`disable`](Self::disable).
    fn restore(&self, mask: Self::Mask);

    /// Whether interrupts are currently delivered on the calling core.
    fn enabled(&self) -> bool;
}

impl<T: InterruptController + ?Sized> InterruptController for std::sync::Arc<T> {
    type Mask = T::Mask;

    #[inline]
    fn disable(&self) -> Self::Mask {
        (**self).disable()
    }

    #[inline]
    fn restore(&self, mask: Self::Mask) {
        (**self).restore(mask);
    }

    #[inline]
    fn enabled(&self) -> bool {
        (**self).enabled()
    }
}

/// Interrupts disabled for the lifetime of the guard.
///
/// Dropping the guard restores the captured mask, on every exit path.
pub struct InterruptGuard<'a, I: InterruptController + ?Sized> {
    controller: &'a I,
    mask: Option<I::Mask>,
}

impl<'a, I: InterruptController + ?Sized> InterruptGuard<'a, I> {
    /// Disable interrupts on `controller` until the guard is dropped.
    #[inline]
    pub fn new(controller: &'a I) -> Self {
        let mask = controller.disable();
        Self {
            controller,
            mask: Some(mask),
        }
    }
}

impl<I: InterruptController + ?Sized> Drop for InterruptGuard<'_, I> {
    #[inline]
    fn drop(&mut self) {
        if let Some(mask) = self.mask.take() {
            self.controller.restore(mask);
        }
    }
}

type Handler = Box<dyn FnOnce() + Send>;

/// A single simulated core.
///
/// [`raise`](Self::raise) delivers an interrupt at once while delivery is
/// enabled. While disabled, interrupts queue up and run in arrival order
/// as soon as a restore turns delivery back on. Handlers themselves run
/// with interrupts disabled, like a hardware exception entry.
pub struct SimulatedInterrupts {
    enabled: AtomicBool,
    pending: Mutex<VecDeque<Handler>>,
    delivered: AtomicU64,
}

/// Saved state of a [`SimulatedInterrupts`] core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedMask {
    was_enabled: bool,
}

impl fmt::Debug for SimulatedInterrupts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedInterrupts")
            .field("enabled", &self.enabled())
            .field("pending", &self.pending_count())
            .field("delivered", &self.delivered())
            .finish()
    }
}

impl Default for SimulatedInterrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedInterrupts {
    /// Create a core with interrupts enabled and nothing pending.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            pending: Mutex::new(VecDeque::new()),
            delivered: AtomicU64::new(0),
        }
    }

    /// Signal an interrupt. Runs `handler` now if delivery is enabled,
    /// otherwise when delivery is next re-enabled.
    pub fn raise<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.enabled() {
            self.dispatch(Box::new(handler));
        } else {
            trace!("Interrupt raised while masked, deferring");
            self.lock_pending().push_back(Box::new(handler));
        }
    }

    /// Interrupts waiting for delivery.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Interrupts delivered so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, VecDeque<Handler>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, handler: Handler) {
        let _guard = InterruptGuard::new(self);
        handler();
        self.delivered.fetch_add(1, Ordering::AcqRel);
    }

    fn deliver_pending(&self) {
        // The queue lock is released before each handler runs so handlers
        // may raise further interrupts.
        loop {
            let next = self.lock_pending().pop_front();
            match next {
                Some(handler) => self.dispatch(handler),
                None => break,
            }
        }
    }
}

impl InterruptController for SimulatedInterrupts {
    type Mask = SimulatedMask;

    #[inline]
    fn disable(&self) -> SimulatedMask {
        SimulatedMask {
            was_enabled: self.enabled.swap(false, Ordering::AcqRel),
        }
    }

    #[inline]
    fn restore(&self, mask: SimulatedMask) {
        self.enabled.store(mask.was_enabled, Ordering::Release);
        if mask.was_enabled {
            self.deliver_pending();
        }
    }

    #[inline]
    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

#[cfg(unix)]
pub use self::signal::{SignalInterrupts, SignalMask};

#[cfg(unix)]
mod signal {
    use super::InterruptController;
    use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow, Signal};
    use tracing::warn;

    /// Host interrupt line backed by a POSIX signal.
    ///
    /// Disabling blocks the signal on the calling thread; restoring puts the
    /// thread's previous signal mask back verbatim. Like a CPU interrupt
    /// mask this is local to one thread and excludes nothing on others.
    #[derive(Debug, Clone, Copy)]
    pub struct SignalInterrupts {
        signal: Signal,
    }

    /// The thread signal mask captured by [`SignalInterrupts::disable`].
    #[derive(Debug, Clone)]
    pub struct SignalMask(SigSet);

    impl Default for SignalInterrupts {
        fn default() -> Self {
            Self::new(Signal::SIGALRM)
        }
    }

    impl SignalInterrupts {
        /// Use `signal` as the interrupt line.
        #[must_use]
        pub fn new(signal: Signal) -> Self {
            Self { signal }
        }

        /// The signal standing in for the interrupt line.
        #[must_use]
        pub fn signal(&self) -> Signal {
            self.signal
        }
    }

    impl InterruptController for SignalInterrupts {
        type Mask = SignalMask;

        fn disable(&self) -> SignalMask {
            let mut block = SigSet::empty();
            block.add(self.signal);
            let mut previous = SigSet::empty();
            if let Err(e) = pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&block), Some(&mut previous)) {
                // pthread_sigmask only fails for an invalid `how`; keep the
                // reader total and fall back to the current mask.
                warn!(signal = %self.signal, error = %e, "Failed to block interrupt signal");
                previous = SigSet::thread_get_mask().unwrap_or_else(|_| SigSet::empty());
            }
            SignalMask(previous)
        }

        fn restore(&self, mask: SignalMask) {
            if let Err(e) = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&mask.0), None) {
                warn!(signal = %self.signal, error = %e, "Failed to restore signal mask");
            }
        }

        fn enabled(&self) -> bool {
            SigSet::thread_get_mask().map_or(true, |mask| !mask.contains(self.signal))
        }
    }
}
