//! Interrupt-mask acceptance tests with a real signal writer.
//!
//! # Acceptance Criteria
//!
//! - A rebase interrupt arriving in the middle of a read waits until the
//!   reader restores its mask, so the read sees only the old pair
//! - The host service under `interrupt_mask` stays monotonic across real
//!   counter wraps when rebased from its interrupt signal

use super::common::{assert_monotonic, signal_timer_lock};
use ostime_common::config::{ClockConfig, RebaseConfig, SyncStrategy};
use ostime_common::time::{Anchor, OsTime, TickRate};
use ostime_runtime::anchor::{AnchorStore, MaskedAnchor};
use ostime_runtime::counter::ManualCounter;
use ostime_runtime::interrupt::{InterruptController, SignalInterrupts};
use ostime_runtime::rebase_timer::HostRebaser;
use ostime_runtime::service::{HostTimeService, TimeService};
use ostime_runtime::signal_timer::{SignalLine, SignalRebaseTimer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn test_signal_during_read_sees_old_pair() {
    let _timer = signal_timer_lock();
    let old = Anchor::new(1000, OsTime(50_000));
    let store = Arc::new(MaskedAnchor::new(SignalInterrupts::default(), old));

    // The first counter sample raises the rebase interrupt on this thread.
    // It cannot run yet: the reader has the line masked.
    let line = SignalLine::current();
    let fired = Arc::new(AtomicBool::new(false));
    let hook_store = Arc::clone(&store);
    let hook_fired = Arc::clone(&fired);
    let counter = ManualCounter::with_read_hook(1250, move |_| {
        if hook_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        assert!(!hook_store.interrupts().enabled());
        line.raise().unwrap();
        assert_eq!(hook_store.load(), old);
    });

    let service = Arc::new(TimeService::new(counter, Arc::clone(&store), TickRate::default()));
    let mut timer = SignalRebaseTimer::new(Duration::from_secs(3600));
    timer.start(Arc::clone(&service)).unwrap();

    // Entirely the old pair.
    assert_eq!(service.read_time(), OsTime(50_250));
    assert!(fired.load(Ordering::SeqCst));

    // The handler ran as the mask was restored.
    assert_eq!(timer.stats().count, 1);
    assert_eq!(timer.stats().last_gap, 250);
    assert_eq!(store.load(), Anchor::new(1250, OsTime(50_250)));
    assert_eq!(service.read_time(), OsTime(50_250));

    timer.stop();
}

#[test]
fn test_masked_host_service_monotonic_across_wraps() {
    let _timer = signal_timer_lock();

    // 2^32 Hz wraps the counter every second; start just before a wrap.
    let rate = TickRate::new(1 << 32).unwrap();
    let mut config = ClockConfig::default();
    config.counter.rate_hz = rate;
    config.counter.start = u32::MAX - 1_000_000;
    config.sync.strategy = SyncStrategy::InterruptMask;
    config.rebase = RebaseConfig {
        enabled: true,
        interval: Duration::from_millis(50),
    };

    let service = Arc::new(HostTimeService::from_config(&config).unwrap());
    let mut rebaser = HostRebaser::start(&config, Arc::clone(&service)).unwrap();

    let started = Instant::now();
    let mut reads = Vec::new();
    while started.elapsed() < Duration::from_millis(2_300) {
        reads.push(service.read_time());
        std::thread::sleep(Duration::from_micros(200));
    }
    rebaser.stop();

    assert_monotonic(&reads);

    let span = reads.last().unwrap().ticks() - reads.first().unwrap().ticks();
    assert!(
        span > 2 * (1u64 << 32),
        "clock should cover at least two wraps, covered {span} ticks"
    );

    let stats = rebaser.stats();
    assert!(stats.count > 10);
    assert!(!stats.is_near_wrap());
}
