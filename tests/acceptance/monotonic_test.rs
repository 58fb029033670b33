//! Monotonicity acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Reads never decrease while the counter wraps many times
//! - The clock equals the total elapsed ticks when rebased at least once per wrap
//! - A host service kept rebased by its timer stays monotonic across real wraps

use super::common::{assert_monotonic, spin_service, StepGen};
use ostime_common::config::{ClockConfig, RebaseConfig};
use ostime_common::time::{Anchor, OsTime, TickRate};
use ostime_runtime::rebase_timer::RebaseTimer;
use ostime_runtime::service::HostTimeService;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn test_long_run_matches_elapsed_ticks() {
    let service = spin_service(0xFFFF_0000, Anchor::new(0xFFFF_0000, OsTime(0)));
    let mut steps = StepGen::new(0x5EED);
    let mut elapsed: u64 = 0;
    let mut reads = Vec::new();

    for round in 0..2_000 {
        // Several reads per rebase; the counter may move almost a full
        // period between rebases.
        for _ in 0..4 {
            let step = steps.next_step(0x3FFF_FFFF);
            service.counter().advance(step);
            elapsed += u64::from(step);
            let now = service.read_time();
            assert_eq!(now, OsTime(elapsed), "round {round}");
            reads.push(now);
        }
        service.rebase();
    }

    assert_monotonic(&reads);
    assert!(elapsed > 100 * (1u64 << 32), "expected many wraps");
}

#[test]
fn test_missed_rebase_loses_a_period() {
    // Two full wraps between rebases cannot be told apart from zero.
    let service = spin_service(0, Anchor::new(0, OsTime(1_000)));
    service.counter().advance(0x8000_0000);
    service.counter().advance(0x8000_0000);
    service.counter().advance(5);
    assert_eq!(service.read_time(), OsTime(1_005));
}

#[test]
fn test_set_time_then_monotonic() {
    let service = spin_service(42, Anchor::new(0, OsTime(0)));
    service.set_time(OsTime(1 << 40));

    let mut reads = vec![service.read_time()];
    for _ in 0..100 {
        service.counter().advance(0x1234_5678);
        reads.push(service.read_time());
        service.rebase();
    }
    assert_eq!(reads[0], OsTime(1 << 40));
    assert_monotonic(&reads);
}

#[test]
fn test_host_service_monotonic_across_wraps() {
    // 2^32 Hz wraps the counter every second; start just before a wrap.
    let rate = TickRate::new(1 << 32).unwrap();
    let mut config = ClockConfig::default();
    config.counter.rate_hz = rate;
    config.counter.start = u32::MAX - 1_000_000;
    config.rebase = RebaseConfig {
        enabled: true,
        interval: Duration::from_millis(50),
    };

    let service = Arc::new(HostTimeService::from_config(&config).unwrap());
    let mut timer = RebaseTimer::from_config(&config.rebase, rate).unwrap();
    timer.start(Arc::clone(&service)).unwrap();

    let started = Instant::now();
    let mut reads = Vec::new();
    while started.elapsed() < Duration::from_millis(2_300) {
        reads.push(service.read_time());
        std::thread::sleep(Duration::from_micros(200));
    }
    timer.stop();

    assert_monotonic(&reads);

    let span = reads.last().unwrap().ticks() - reads.first().unwrap().ticks();
    assert!(
        span > 2 * (1u64 << 32),
        "clock should cover at least two wraps, covered {span} ticks"
    );

    let stats = timer.stats();
    assert!(stats.count > 10);
    assert!(!stats.is_near_wrap());
}
