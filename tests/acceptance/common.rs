//! Common utilities for the acceptance tests.

#![allow(dead_code)] // Not every helper is used by every test module

use ostime_common::time::{Anchor, OsTime, TickRate};
use ostime_runtime::anchor::SpinAnchor;
use ostime_runtime::counter::ManualCounter;
use ostime_runtime::service::TimeService;
use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;

/// Only one signal rebase timer may run per process.
static SIGNAL_TIMER: Mutex<()> = Mutex::new(());

/// Hold while a test runs a signal rebase timer.
pub fn signal_timer_lock() -> MutexGuard<'static, ()> {
    SIGNAL_TIMER.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Deterministic step generator (64-bit LCG) for reproducible runs.
#[derive(Debug, Clone)]
pub struct StepGen(u64);

impl StepGen {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// Next step in `1..=max`.
    pub fn next_step(&mut self, max: u32) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let high = (self.0 >> 32) as u32;
        high % max + 1
    }
}

/// A manually driven service over a spin-locked anchor.
pub fn spin_service(counter: u32, anchor: Anchor) -> TimeService<ManualCounter, SpinAnchor> {
    TimeService::new(
        ManualCounter::new(counter),
        SpinAnchor::new(anchor),
        TickRate::default(),
    )
}

/// Write `content` to a temporary `.toml` file.
pub fn write_config(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("ostime-")
        .suffix(".toml")
        .tempfile()
        .expect("Failed to create temp config file");
    file.write_all(content.as_bytes())
        .expect("Failed to write temp config file");
    file
}

/// Assert that `reads` never decreases, reporting the first offending pair.
pub fn assert_monotonic(reads: &[OsTime]) {
    for (i, pair) in reads.windows(2).enumerate() {
        assert!(
            pair[1] >= pair[0],
            "read {} went backwards: {} -> {}",
            i + 1,
            pair[0],
            pair[1]
        );
    }
}
