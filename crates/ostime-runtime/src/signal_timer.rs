//! Interrupt-driven rebasing for the interrupt mask discipline.
//!
//! On a single core the rebasing writer is an interrupt handler. The host
//! stand-in is a POSIX signal aimed at one thread with `pthread_kill`: the
//! handler runs on that thread only, so blocking the signal there with
//! [`SignalInterrupts`] excludes the writer the way masking excludes an
//! interrupt on a core. A signal raised while the reader has it blocked
//! stays pending and is delivered as soon as the reader restores its mask.
//!
//! The handler touches atomics, the counter and the store's signal mask.
//! It never allocates, locks or logs.

use crate::anchor::{ConfiguredAnchor, MaskedAnchor};
use crate::counter::TickCounter;
use crate::interrupt::SignalInterrupts;
use crate::service::{HostTimeService, TimeService};
use nix::sys::pthread::{pthread_kill, pthread_self, Pthread};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use ostime_common::config::RebaseConfig;
use ostime_common::error::{ClockError, ClockResult};
use ostime_common::metrics::RebaseStats;
use ostime_common::time::TickRate;
use std::marker::PhantomData;
use std::os::raw::c_int;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A signal delivered to one thread: that thread's interrupt line.
#[derive(Debug, Clone, Copy)]
pub struct SignalLine {
    thread: Pthread,
    signal: Signal,
}

// SAFETY: a pthread_t is an opaque thread id. Sharing it only lets other
// threads direct a signal at the thread it names.
#[allow(unsafe_code)]
unsafe impl Send for SignalLine {}
#[allow(unsafe_code)]
unsafe impl Sync for SignalLine {}

impl SignalLine {
    /// SIGALRM on the calling thread.
    #[must_use]
    pub fn current() -> Self {
        Self::for_current_thread(Signal::SIGALRM)
    }

    /// `signal` on the calling thread.
    #[must_use]
    pub fn for_current_thread(signal: Signal) -> Self {
        Self {
            thread: pthread_self(),
            signal,
        }
    }

    /// The signal raised on this line.
    #[must_use]
    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Raise the interrupt on the line's thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal cannot be sent.
    pub fn raise(&self) -> ClockResult<()> {
        pthread_kill(self.thread, self.signal).map_err(|e| {
            ClockError::TimerService(format!("failed to raise {}: {e}", self.signal))
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn thread_id(&self) -> usize {
        self.thread as usize
    }
}

#[allow(clippy::cast_possible_truncation)]
fn current_thread_id() -> usize {
    pthread_self() as usize
}

/// A time service whose writer is its interrupt signal.
pub trait InterruptRebase: Send + Sync + 'static {
    /// Signal whose masking excludes the handler, or `None` when the store
    /// is not interrupt-masked and must not be written from a handler.
    fn masked_signal(&self) -> Option<Signal>;

    /// Rebase from inside the signal handler. Returns the gap in ticks.
    fn rebase_from_interrupt(&self) -> u32;
}

impl<C: TickCounter + 'static> InterruptRebase for TimeService<C, MaskedAnchor<SignalInterrupts>> {
    fn masked_signal(&self) -> Option<Signal> {
        Some(self.store().interrupts().signal())
    }

    fn rebase_from_interrupt(&self) -> u32 {
        self.rebase_quiet().gap()
    }
}

impl<C: TickCounter + 'static> InterruptRebase
    for TimeService<C, Arc<MaskedAnchor<SignalInterrupts>>>
{
    fn masked_signal(&self) -> Option<Signal> {
        Some(self.store().interrupts().signal())
    }

    fn rebase_from_interrupt(&self) -> u32 {
        self.rebase_quiet().gap()
    }
}

impl InterruptRebase for HostTimeService {
    fn masked_signal(&self) -> Option<Signal> {
        match self.store() {
            ConfiguredAnchor::Masked(store) => Some(store.interrupts().signal()),
            ConfiguredAnchor::Spin(_) => None,
        }
    }

    fn rebase_from_interrupt(&self) -> u32 {
        self.rebase_quiet().gap()
    }
}

/// Gap statistics written from the handler.
#[derive(Debug)]
struct InterruptStats {
    count: AtomicU64,
    last_gap: AtomicU32,
    min_gap: AtomicU32,
    max_gap: AtomicU32,
}

impl InterruptStats {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            last_gap: AtomicU32::new(0),
            min_gap: AtomicU32::new(u32::MAX),
            max_gap: AtomicU32::new(0),
        }
    }

    fn record(&self, gap: u32) {
        self.last_gap.store(gap, Ordering::Relaxed);
        self.min_gap.fetch_min(gap, Ordering::Relaxed);
        self.max_gap.fetch_max(gap, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Release);
    }

    fn snapshot(&self) -> RebaseStats {
        RebaseStats {
            count: self.count.load(Ordering::Acquire),
            last_gap: self.last_gap.load(Ordering::Relaxed),
            min_gap: self.min_gap.load(Ordering::Relaxed),
            max_gap: self.max_gap.load(Ordering::Relaxed),
        }
    }
}

/// What the handler rebases. Published through [`SLOT`].
struct Slot {
    target: Arc<dyn InterruptRebase>,
    stats: Arc<InterruptStats>,
}

/// The active timer's target, or null. Only one timer runs per process.
static SLOT: AtomicPtr<Slot> = AtomicPtr::new(ptr::null_mut());

/// Thread the active timer rebases on. The handler ignores other threads.
static TARGET_THREAD: AtomicUsize = AtomicUsize::new(0);

extern "C" fn on_interrupt(_signo: c_int) {
    if TARGET_THREAD.load(Ordering::Acquire) != current_thread_id() {
        return;
    }
    let slot = SLOT.load(Ordering::Acquire);
    // SAFETY: a published slot is freed only by `SignalRebaseTimer::stop`,
    // which runs on the target thread after unpublishing it. This handler
    // runs on the target thread too, so the two never overlap.
    #[allow(unsafe_code)]
    let Some(slot) = (unsafe { slot.as_ref() }) else {
        return;
    };
    let gap = slot.target.rebase_from_interrupt();
    slot.stats.record(gap);
}

fn install_handler(signal: Signal) -> ClockResult<()> {
    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: `on_interrupt` only uses atomics and the target service,
    // whose rebase path is async-signal-safe for interrupt-masked stores.
    #[allow(unsafe_code)]
    let installed = unsafe { sigaction(signal, &action) };
    installed
        .map(drop)
        .map_err(|e| ClockError::TimerService(format!("failed to install {signal} handler: {e}")))
}

/// Periodic rebase driven by an interrupt signal on the creating thread.
///
/// A helper thread raises the signal once per interval; the handler then
/// rebases the service on the thread that created the timer, which is the
/// thread whose reads the signal mask protects. The timer cannot leave that
/// thread. One timer may be active per process.
#[derive(Debug)]
pub struct SignalRebaseTimer {
    line: SignalLine,
    interval: Duration,
    stats: Arc<InterruptStats>,
    stop_requested: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    _thread_bound: PhantomData<*const ()>,
}

impl SignalRebaseTimer {
    /// Create a stopped timer that rebases on the calling thread.
    ///
    /// The interval is not checked against the counter wrap period; use
    /// [`from_config`](Self::from_config) for a validated timer.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            line: SignalLine::current(),
            interval,
            stats: Arc::new(InterruptStats::new()),
            stop_requested: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            _thread_bound: PhantomData,
        }
    }

    /// Create a stopped timer from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the interval is zero or not shorter than the
    /// wrap period of a counter running at `rate`.
    pub fn from_config(config: &RebaseConfig, rate: TickRate) -> ClockResult<Self> {
        config.validate(rate)?;
        Ok(Self::new(config.interval))
    }

    /// Start rebasing `service` from the interrupt signal.
    ///
    /// # Errors
    ///
    /// Returns an error if this or another signal timer is running, the
    /// service is not masked against this timer's signal, or the handler or
    /// helper thread cannot be set up.
    pub fn start<T: InterruptRebase>(&mut self, service: Arc<T>) -> ClockResult<()> {
        if self.running.load(Ordering::Acquire) {
            return Err(ClockError::TimerService("signal rebase timer already running".into()));
        }

        let signal = self.line.signal();
        match service.masked_signal() {
            Some(masked) if masked == signal => {}
            Some(masked) => {
                return Err(ClockError::IncompatibleSync {
                    strategy: format!("interrupt_mask on {masked}"),
                    writer: format!("a {signal} handler"),
                });
            }
            None => {
                return Err(ClockError::IncompatibleSync {
                    strategy: "spinlock".into(),
                    writer: format!("a {signal} handler"),
                });
            }
        }

        install_handler(signal)?;

        let slot = Box::into_raw(Box::new(Slot {
            target: service,
            stats: Arc::clone(&self.stats),
        }));
        if SLOT
            .compare_exchange(ptr::null_mut(), slot, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // SAFETY: `slot` was never published, this is the only owner.
            #[allow(unsafe_code)]
            drop(unsafe { Box::from_raw(slot) });
            return Err(ClockError::TimerService(
                "another signal rebase timer is active".into(),
            ));
        }
        TARGET_THREAD.store(self.line.thread_id(), Ordering::Release);

        info!(
            interval_ms = self.interval.as_millis(),
            %signal,
            "Starting signal rebase timer"
        );

        self.stop_requested.store(false, Ordering::Release);
        self.running.store(true, Ordering::Release);

        let line = self.line;
        let interval = self.interval;
        let stop_requested = Arc::clone(&self.stop_requested);
        let running = Arc::clone(&self.running);

        match thread::Builder::new()
            .name("ostime-irq-timer".into())
            .spawn(move || {
                debug!("Signal rebase timer thread started");

                let mut deadline = Instant::now() + interval;
                while !stop_requested.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if now < deadline {
                        thread::park_timeout(deadline - now);
                        continue;
                    }

                    if let Err(e) = line.raise() {
                        warn!(error = %e, "Failed to raise rebase interrupt");
                        break;
                    }
                    deadline += interval;

                    if deadline < now {
                        warn!(interval_ms = interval.as_millis(), "Signal rebase timer overran its period");
                        deadline = now + interval;
                    }
                }

                running.store(false, Ordering::Release);
                debug!("Signal rebase timer thread stopped");
            }) {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                release_slot();
                Err(ClockError::TimerService(format!(
                    "failed to spawn signal rebase timer thread: {e}"
                )))
            }
        }
    }

    /// Stop raising the signal and detach the handler from the service.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        info!("Stopping signal rebase timer");
        self.stop_requested.store(true, Ordering::Release);
        handle.thread().unpark();

        if let Err(e) = handle.join() {
            warn!("Signal rebase timer thread panicked: {:?}", e);
        }
        release_slot();
        self.running.store(false, Ordering::Release);
    }

    /// Check if the timer is raising interrupts.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Rebase statistics collected so far.
    pub fn stats(&self) -> RebaseStats {
        self.stats.snapshot()
    }

    /// Time between rebases.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The interrupt line this timer raises.
    pub fn line(&self) -> SignalLine {
        self.line
    }
}

impl Drop for SignalRebaseTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Unpublish and free the active slot. Must run on the target thread.
fn release_slot() {
    TARGET_THREAD.store(0, Ordering::Release);
    let slot = SLOT.swap(ptr::null_mut(), Ordering::AcqRel);
    if !slot.is_null() {
        // SAFETY: the slot came from `Box::into_raw` in `start` and is no
        // longer reachable by the handler, which only runs on this thread.
        #[allow(unsafe_code)]
        drop(unsafe { Box::from_raw(slot) });
    }
}

static_assertions::assert_impl_all!(SignalLine: Send, Sync);
static_assertions::assert_not_impl_any!(SignalRebaseTimer: Send, Sync);
