//! Configuration acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - A TOML file fully describes the host service and its rebase timer
//! - Each discipline gets the writer it can exclude: a thread for the spin
//!   lock, the interrupt signal for interrupt masking
//! - Invalid combinations are rejected before anything starts

use super::common::{signal_timer_lock, write_config};
use ostime_common::config::{ClockConfig, SyncStrategy};
use ostime_common::error::ClockError;
use ostime_common::time::OsTime;
use ostime_runtime::anchor::ConfiguredAnchor;
use ostime_runtime::rebase_timer::{HostRebaser, RebaseTimer};
use ostime_runtime::service::HostTimeService;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn test_service_from_config_file() {
    let file = write_config(
        r#"
initial_time = 5000000

[counter]
rate_hz = 1000000
start = 4294967000

[sync]
strategy = "spinlock"

[rebase]
enabled = true
interval = "20ms"
"#,
    );

    let config = ClockConfig::from_file(file.path()).unwrap();
    assert_eq!(config.initial_time, OsTime(5_000_000));
    assert_eq!(config.counter.rate_hz.hz(), 1_000_000);
    assert_eq!(config.rebase.interval, Duration::from_millis(20));

    let service = Arc::new(HostTimeService::from_config(&config).unwrap());
    assert!(matches!(service.store(), ConfiguredAnchor::Spin(_)));
    assert!(service.read_time() >= OsTime(5_000_000));

    let mut timer = RebaseTimer::from_config(&config.rebase, service.rate()).unwrap();
    timer.start(Arc::clone(&service)).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    timer.stop();

    assert!(timer.stats().count >= 1);
    // Started 296 ticks before a wrap, the clock still only moved forward.
    let now = service.read_time();
    assert!(now >= OsTime(5_000_000 + 90_000), "clock read {now}");
}

#[cfg(unix)]
#[test]
fn test_interrupt_mask_rebased_by_signal() {
    let _timer = signal_timer_lock();
    let file = write_config(
        r#"
[sync]
strategy = "interrupt_mask"

[rebase]
interval = "5ms"
"#,
    );
    let config = ClockConfig::from_file(file.path()).unwrap();
    assert_eq!(config.sync.strategy, SyncStrategy::InterruptMask);

    let service = Arc::new(HostTimeService::from_config(&config).unwrap());
    assert!(matches!(service.store(), ConfiguredAnchor::Masked(_)));

    let mut rebaser = HostRebaser::start(&config, Arc::clone(&service)).unwrap();
    assert!(matches!(rebaser, HostRebaser::Signal(_)));

    let first = service.read_time();
    let deadline = Instant::now() + Duration::from_secs(5);
    while rebaser.stats().count < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    rebaser.stop();

    assert!(rebaser.stats().count >= 3);
    assert!(service.read_time() >= first);
}

#[cfg(unix)]
#[test]
fn test_interrupt_mask_rejects_timer_thread() {
    let file = write_config("[sync]\nstrategy = \"interrupt_mask\"\n");
    let config = ClockConfig::from_file(file.path()).unwrap();
    let service = Arc::new(HostTimeService::from_config(&config).unwrap());

    let mut timer = RebaseTimer::from_config(&config.rebase, service.rate()).unwrap();
    let err = timer.start(service).unwrap_err();
    assert!(matches!(err, ClockError::IncompatibleSync { .. }));
}

#[test]
fn test_rebase_disabled_rejected() {
    for strategy in ["spinlock", "interrupt_mask"] {
        let file = write_config(&format!(
            "[sync]\nstrategy = \"{strategy}\"\n\n[rebase]\nenabled = false\n"
        ));
        let config = ClockConfig::from_file(file.path()).unwrap();
        assert!(!config.rebase.enabled);

        let err = HostTimeService::from_config(&config).unwrap_err();
        assert!(matches!(err, ClockError::Config(_)), "{strategy}: {err}");
    }
}

#[test]
fn test_initial_time_beyond_toml_range_rejected() {
    let mut config = ClockConfig::default();
    config.initial_time = OsTime(u64::MAX);
    assert!(matches!(
        HostTimeService::from_config(&config),
        Err(ClockError::Config(_))
    ));
}

#[test]
fn test_rebase_interval_beyond_wrap_rejected() {
    // At the default rate the counter wraps after about 91.6 seconds.
    let file = write_config(
        r#"
[rebase]
interval = "2m"
"#,
    );
    let config = ClockConfig::from_file(file.path()).unwrap();
    let err = HostTimeService::from_config(&config).unwrap_err();
    assert!(matches!(err, ClockError::RebaseInterval { .. }));
}

#[test]
fn test_zero_rate_rejected_on_load() {
    let file = write_config("[counter]\nrate_hz = 0\n");
    assert!(ClockConfig::from_file(file.path()).is_err());
}

#[test]
fn test_written_config_loads_back() {
    let mut config = ClockConfig::default();
    config.initial_time = OsTime(77);
    config.rebase.interval = Duration::from_millis(250);

    let file = write_config(&config.to_toml().unwrap());
    let loaded = ClockConfig::from_file(file.path()).unwrap();
    assert_eq!(loaded.initial_time, OsTime(77));
    assert_eq!(loaded.rebase.interval, Duration::from_millis(250));
    assert_eq!(loaded.sync.strategy, SyncStrategy::Spinlock);
}
