//! Monotonic clock reader and the writer paths that re-anchor it.
//!
//! A [`TimeService`] owns the counter capability and the base pair. Reading
//! the clock samples the counter and the pair as one observation and returns
//!
//! ```text
//! time = (sample - anchor.counter) mod 2^32 + anchor.time
//! ```
//!
//! The result is monotonically non-decreasing as long as the pair is only
//! advanced by consistent rebases and the counter wraps at most once
//! between two rebases.

use crate::anchor::{AnchorStore, AnchorUpdate, ConfiguredAnchor, HostInterrupts, MaskedAnchor, SpinAnchor};
use crate::counter::{HostCounter, TickCounter};
use ostime_common::config::{ClockConfig, SyncStrategy};
use ostime_common::error::{ClockError, ClockResult};
use ostime_common::time::{Anchor, OsTime, TickRate, COUNTER_PERIOD};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// The time service: counter capability plus base pair.
#[derive(Debug)]
pub struct TimeService<C: TickCounter, S: AnchorStore> {
    counter: C,
    store: S,
    rate: TickRate,
}

impl<C: TickCounter, S: AnchorStore> TimeService<C, S> {
    /// Create a service over `counter` whose pair lives in `store`.
    ///
    /// The store's current anchor is used as is; call [`init`](Self::init)
    /// to anchor the clock at time zero.
    pub fn new(counter: C, store: S, rate: TickRate) -> Self {
        Self {
            counter,
            store,
            rate,
        }
    }

    /// Anchor the clock at the current counter value with time zero.
    pub fn init(&self) -> Anchor {
        let update = self
            .store
            .update(&self.counter, |sample, _| Anchor::new(sample, OsTime::ZERO));
        debug!(counter = update.current.counter, "Time service initialized");
        update.current
    }

    /// Read the logical clock.
    ///
    /// Samples the counter and the base pair atomically with respect to the
    /// rebasing writer, then adds the wrapping 32-bit distance from the base
    /// counter to the base time. Never fails; before the pair has been set up
    /// the value is meaningless but still returned.
    #[inline]
    pub fn read_time(&self) -> OsTime {
        let (sample, anchor) = self.store.observe(&self.counter);
        anchor.time_at(sample)
    }

    /// Move the anchor forward to the current counter value.
    ///
    /// Subsequent reads return the same values they would have without the
    /// rebase; the only effect is a fresh reference point for wraparound.
    pub fn rebase(&self) -> AnchorUpdate {
        let update = self.rebase_quiet();

        let gap = update.gap();
        if u64::from(gap) > COUNTER_PERIOD / 2 {
            warn!(
                gap,
                gap_ms = OsTime(u64::from(gap)).to_duration(self.rate).as_millis(),
                "Counter advanced more than half a wrap between rebases"
            );
        } else {
            trace!(gap, time = update.current.time.ticks(), "Rebased clock anchor");
        }
        update
    }

    /// [`rebase`](Self::rebase) without logging.
    ///
    /// Touches only the counter, the store and its interrupt line, so it
    /// may run inside a signal handler when both are async-signal-safe.
    #[inline]
    pub fn rebase_quiet(&self) -> AnchorUpdate {
        self.store
            .update(&self.counter, |sample, anchor| anchor.rebased(sample))
    }

    /// Re-anchor the clock so it reads `time` now and advances from there.
    ///
    /// May move the clock backwards; monotonicity only holds between calls.
    pub fn set_time(&self, time: OsTime) -> AnchorUpdate {
        let update = self
            .store
            .update(&self.counter, |sample, _| Anchor::new(sample, time));
        debug!(
            from = update.previous.time_at(update.sample).ticks(),
            to = time.ticks(),
            "Clock set"
        );
        update
    }

    /// Current base pair.
    pub fn anchor(&self) -> Anchor {
        self.store.load()
    }

    /// Logical clock as a duration since the epoch.
    pub fn now(&self) -> Duration {
        self.read_time().to_duration(self.rate)
    }

    /// Counter frequency.
    pub fn rate(&self) -> TickRate {
        self.rate
    }

    /// The counter capability.
    pub fn counter(&self) -> &C {
        &self.counter
    }

    /// The anchor store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

/// Time service over the host counter with a configured discipline.
pub type HostTimeService = TimeService<HostCounter, ConfiguredAnchor>;

impl HostTimeService {
    /// Build a host time service from configuration.
    ///
    /// The clock reads `config.initial_time` at the moment of construction.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation, or if it
    /// asks for interrupt masking on a host without signals.
    pub fn from_config(config: &ClockConfig) -> ClockResult<Self> {
        config.validate()?;
        if cfg!(not(unix)) && config.sync.strategy == SyncStrategy::InterruptMask {
            return Err(ClockError::IncompatibleSync {
                strategy: config.sync.strategy.to_string(),
                writer: "a host without interrupt signals".into(),
            });
        }

        let rate = config.counter.rate_hz;
        let counter = HostCounter::new(rate, config.counter.start);
        let anchor = Anchor::new(counter.read(), config.initial_time);

        let store = match config.sync.strategy {
            SyncStrategy::Spinlock => ConfiguredAnchor::Spin(SpinAnchor::new(anchor)),
            SyncStrategy::InterruptMask => {
                ConfiguredAnchor::Masked(MaskedAnchor::new(HostInterrupts::default(), anchor))
            }
        };

        info!(
            %rate,
            strategy = %config.sync.strategy,
            counter = anchor.counter,
            time = anchor.time.ticks(),
            "Host time service created"
        );
        Ok(Self::new(counter, store, rate))
    }
}

static_assertions::assert_impl_all!(HostTimeService: Send, Sync);
