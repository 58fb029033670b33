//! Clock sampling and monotonicity report.

use ostime_common::config::SyncStrategy;
use ostime_common::metrics::RebaseStats;
use ostime_common::time::{OsTime, TickRate};
use ostime_runtime::anchor::AnchorStore;
use ostime_runtime::counter::TickCounter;
use ostime_runtime::service::TimeService;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::warn;

/// Running monotonicity check over a sequence of clock reads.
#[derive(Debug, Clone, Default)]
pub struct MonotonicCheck {
    samples: u64,
    violations: u64,
    largest_backstep: u64,
    first: Option<OsTime>,
    last: Option<OsTime>,
}

impl MonotonicCheck {
    /// Create an empty check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one read. Returns `false` if it went backwards.
    pub fn observe(&mut self, now: OsTime) -> bool {
        self.samples += 1;
        self.first.get_or_insert(now);

        let ok = match self.last {
            Some(last) if now < last => {
                let backstep = last.ticks() - now.ticks();
                self.violations += 1;
                self.largest_backstep = self.largest_backstep.max(backstep);
                warn!(
                    previous = last.ticks(),
                    current = now.ticks(),
                    backstep,
                    "Clock went backwards"
                );
                false
            }
            _ => true,
        };
        self.last = Some(now);
        ok
    }

    /// Reads recorded so far.
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Summarise the check.
    pub fn report(
        &self,
        rate: TickRate,
        strategy: SyncStrategy,
        rebase: Option<RebaseStats>,
    ) -> ProbeReport {
        let first = self.first.unwrap_or(OsTime::ZERO);
        let last = self.last.unwrap_or(first);
        let span = OsTime(last.ticks().saturating_sub(first.ticks())).to_duration(rate);
        ProbeReport {
            samples: self.samples,
            violations: self.violations,
            largest_backstep: self.largest_backstep,
            first_ticks: first.ticks(),
            last_ticks: last.ticks(),
            span_us: u64::try_from(span.as_micros()).unwrap_or(u64::MAX),
            rate_hz: rate.hz(),
            strategy: strategy.to_string(),
            rebase,
        }
    }
}

/// Outcome of a probe run.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// Clock reads taken.
    pub samples: u64,
    /// Reads that went backwards.
    pub violations: u64,
    /// Largest backwards step in ticks.
    pub largest_backstep: u64,
    /// First read in ticks.
    pub first_ticks: u64,
    /// Last read in ticks.
    pub last_ticks: u64,
    /// Logical time covered by the run in microseconds.
    pub span_us: u64,
    /// Counter frequency.
    pub rate_hz: u64,
    /// Synchronisation discipline in use.
    pub strategy: String,
    /// Rebase timer statistics, if the timer ran.
    pub rebase: Option<RebaseStats>,
}

impl ProbeReport {
    /// Whether every read was at least as large as the one before.
    pub fn is_monotonic(&self) -> bool {
        self.violations == 0
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ostime probe ({}, {} Hz)", self.strategy, self.rate_hz)?;
        writeln!(f, "  samples:     {}", self.samples)?;
        writeln!(
            f,
            "  span:        {}",
            humantime::format_duration(Duration::from_micros(self.span_us))
        )?;
        writeln!(f, "  time:        {} -> {}", self.first_ticks, self.last_ticks)?;
        write!(f, "  violations:  {}", self.violations)?;
        if self.violations > 0 {
            write!(f, " (largest backstep {} ticks)", self.largest_backstep)?;
        }
        if let Some(stats) = &self.rebase {
            writeln!(f)?;
            write!(
                f,
                "  rebases:     {} (max gap {} ticks, headroom {} ticks)",
                stats.count,
                stats.max_gap,
                stats.headroom_ticks()
            )?;
        }
        Ok(())
    }
}

/// Read `service` every `interval` until `samples` reads were taken
/// (0 means unbounded) or `stop` returns true.
pub fn run_probe<C, S>(
    service: &TimeService<C, S>,
    samples: u64,
    interval: Duration,
    stop: impl Fn() -> bool,
) -> MonotonicCheck
where
    C: TickCounter,
    S: AnchorStore,
{
    let mut check = MonotonicCheck::new();
    while (samples == 0 || check.samples() < samples) && !stop() {
        check.observe(service.read_time());
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }
    check
}
