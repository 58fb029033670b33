//! Periodic rebase timer.
//!
//! A monitor thread re-anchors the time service once per interval so the
//! 32-bit counter never wraps more than once between two rebases. The gap
//! of every rebase is recorded in [`RebaseStats`].
//!
//! A thread can only be excluded by the spin lock. Interrupt-masked stores
//! are rebased from their interrupt signal instead; [`HostRebaser`] picks
//! the writer that matches the configured discipline.

use crate::anchor::AnchorStore;
use crate::counter::TickCounter;
use crate::service::{HostTimeService, TimeService};
#[cfg(unix)]
use crate::signal_timer::SignalRebaseTimer;
use ostime_common::config::{ClockConfig, RebaseConfig, SyncStrategy};
use ostime_common::error::{ClockError, ClockResult};
use ostime_common::metrics::RebaseStats;
use ostime_common::time::TickRate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Background writer that rebases a [`TimeService`] periodically.
#[derive(Debug)]
pub struct RebaseTimer {
    /// Shared state between the owner and the timer thread.
    state: Arc<TimerState>,
    /// Handle to the timer thread.
    handle: Option<JoinHandle<()>>,
    /// Time between rebases.
    interval: Duration,
    /// Whether the timer thread is running.
    running: Arc<AtomicBool>,
}

#[derive(Debug)]
struct TimerState {
    stop_requested: AtomicBool,
    stats: Mutex<RebaseStats>,
}

impl TimerState {
    fn new() -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            stats: Mutex::new(RebaseStats::new()),
        }
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, RebaseStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RebaseTimer {
    /// Create a stopped timer with the given interval.
    ///
    /// The interval is not checked against the counter wrap period; use
    /// [`from_config`](Self::from_config) for a validated timer.
    pub fn new(interval: Duration) -> Self {
        Self {
            state: Arc::new(TimerState::new()),
            handle: None,
            interval,
            running: Arc::new(AtomicBool::new(false)),
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

    /// Start rebasing `service` on a background thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer is already running, the store is not
    /// spin-locked, or the thread cannot be spawned.
    pub fn start<C, S>(&mut self, service: Arc<TimeService<C, S>>) -> ClockResult<()>
    where
        C: TickCounter + 'static,
        S: AnchorStore + 'static,
    {
        if self.running.load(Ordering::Acquire) {
            return Err(ClockError::TimerService("rebase timer already running".into()));
        }

        let strategy = service.store().strategy();
        if strategy != SyncStrategy::Spinlock {
            return Err(ClockError::IncompatibleSync {
                strategy: strategy.to_string(),
                writer: "the rebase timer thread".into(),
            });
        }

        info!(interval_ms = self.interval.as_millis(), "Starting rebase timer");

        // Clear flags from any previous run to allow restart
        self.state.stop_requested.store(false, Ordering::Release);

        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        let interval = self.interval;

        // Set running BEFORE spawn so is_running() returns true immediately
        self.running.store(true, Ordering::Release);

        let handle = match thread::Builder::new()
            .name("ostime-rebase".into())
            .spawn(move || {
                debug!("Rebase timer thread started");

                let mut deadline = Instant::now() + interval;
                while !state.stop_requested.load(Ordering::Acquire) {
                    let now = Instant::now();
                    if now < deadline {
                        thread::park_timeout(deadline - now);
                        continue;
                    }

                    let update = service.rebase();
                    state.stats().record(update.gap());
                    deadline += interval;

                    // Fell behind by a whole period; don't try to catch up.
                    if deadline < now {
                        warn!(interval_ms = interval.as_millis(), "Rebase timer overran its period");
                        deadline = now + interval;
                    }
                }

                running.store(false, Ordering::Release);
                debug!("Rebase timer thread stopped");
            }) {
            Ok(h) => h,
            Err(e) => {
                // Reset running flag on spawn failure
                self.running.store(false, Ordering::Release);
                return Err(ClockError::TimerService(format!(
                    "failed to spawn rebase timer thread: {e}"
                )));
            }
        };

        self.handle = Some(handle);
        Ok(())
    }

    /// Stop the timer thread and wait for it to exit.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        info!("Stopping rebase timer");
        self.state.stop_requested.store(true, Ordering::Release);
        handle.thread().unpark();

        if let Err(e) = handle.join() {
            warn!("Rebase timer thread panicked: {:?}", e);
        }
        self.running.store(false, Ordering::Release);
    }

    /// Check if the timer thread is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Rebase statistics collected so far.
    pub fn stats(&self) -> RebaseStats {
        *self.state.stats()
    }

    /// Time between rebases.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for RebaseTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The rebasing writer of a [`HostTimeService`].
///
/// The signal variant rebases on the thread that started it and cannot be
/// moved to another one.
#[derive(Debug)]
pub enum HostRebaser {
    /// Timer thread, for the spin lock discipline.
    Thread(RebaseTimer),
    /// Interrupt signal, for the interrupt mask discipline.
    #[cfg(unix)]
    Signal(SignalRebaseTimer),
}

impl HostRebaser {
    /// Start the writer that matches `config.sync.strategy`.
    ///
    /// # Errors
    ///
    /// Returns an error if the rebase interval is invalid for the service's
    /// rate or the writer cannot be started.
    pub fn start(config: &ClockConfig, service: Arc<HostTimeService>) -> ClockResult<Self> {
        match config.sync.strategy {
            SyncStrategy::Spinlock => {
                let mut timer = RebaseTimer::from_config(&config.rebase, service.rate())?;
                timer.start(service)?;
                Ok(Self::Thread(timer))
            }
            #[cfg(unix)]
            SyncStrategy::InterruptMask => {
                let mut timer = SignalRebaseTimer::from_config(&config.rebase, service.rate())?;
                timer.start(service)?;
                Ok(Self::Signal(timer))
            }
            #[cfg(not(unix))]
            SyncStrategy::InterruptMask => Err(ClockError::IncompatibleSync {
                strategy: SyncStrategy::InterruptMask.to_string(),
                writer: "a host without interrupt signals".into(),
            }),
        }
    }

    /// Stop rebasing.
    pub fn stop(&mut self) {
        match self {
            Self::Thread(timer) => timer.stop(),
            #[cfg(unix)]
            Self::Signal(timer) => timer.stop(),
        }
    }

    /// Whether the writer is still active.
    pub fn is_running(&self) -> bool {
        match self {
            Self::Thread(timer) => timer.is_running(),
            #[cfg(unix)]
            Self::Signal(timer) => timer.is_running(),
        }
    }

    /// Rebase statistics collected so far.
    pub fn stats(&self) -> RebaseStats {
        match self {
            Self::Thread(timer) => timer.stats(),
            #[cfg(unix)]
            Self::Signal(timer) => timer.stats(),
        }
    }
}
