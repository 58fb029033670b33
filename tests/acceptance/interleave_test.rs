//! Reader/writer interleaving acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - A read never mixes a counter sample with a pair from a different rebase
//! - Rebase interrupts raised during a masked read run only after the mask
//!   is restored, and never change that read's result
//! - Concurrent readers of a spin-locked pair stay monotonic while a writer
//!   thread advances and rebases the clock

use super::common::assert_monotonic;
use ostime_common::time::{Anchor, OsTime, TickRate};
use ostime_runtime::anchor::{AnchorStore, MaskedAnchor, SpinAnchor};
use ostime_runtime::counter::ManualCounter;
use ostime_runtime::interrupt::{InterruptController, SimulatedInterrupts};
use ostime_runtime::service::TimeService;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn test_rebase_interrupt_every_read() {
    let interrupts = Arc::new(SimulatedInterrupts::new());
    let store = Arc::new(MaskedAnchor::new(
        Arc::clone(&interrupts),
        Anchor::new(0, OsTime(0)),
    ));

    // Every counter sample raises a rebase at that very sample.
    let hook_interrupts = Arc::clone(&interrupts);
    let hook_store = Arc::clone(&store);
    let counter = ManualCounter::with_read_hook(0, move |sample| {
        let store = Arc::clone(&hook_store);
        hook_interrupts.raise(move || {
            store.update(&ManualCounter::new(sample), |s, anchor| anchor.rebased(s));
        });
    });
    let service = TimeService::new(counter, Arc::clone(&store), TickRate::default());

    let step = 0x7000_0001u32;
    let mut reads = Vec::new();
    for i in 1..=500u64 {
        service.counter().advance(step);
        let now = service.read_time();
        assert_eq!(now, OsTime(i * u64::from(step)));
        assert_eq!(interrupts.delivered(), i);
        assert_eq!(interrupts.pending_count(), 0);
        assert_eq!(store.load(), Anchor::new(service.counter().peek(), now));
        reads.push(now);
    }
    assert_monotonic(&reads);
    assert!(interrupts.enabled());
}

#[test]
fn test_read_inside_critical_section_keeps_mask() {
    let interrupts = Arc::new(SimulatedInterrupts::new());
    let service = TimeService::new(
        ManualCounter::new(1250),
        MaskedAnchor::new(Arc::clone(&interrupts), Anchor::new(1000, OsTime(50_000))),
        TickRate::default(),
    );

    let delivered = Arc::new(AtomicBool::new(false));
    let mask = interrupts.disable();
    {
        let delivered = Arc::clone(&delivered);
        interrupts.raise(move || delivered.store(true, Ordering::SeqCst));
    }

    assert_eq!(service.read_time(), OsTime(50_250));
    // The reader restored "disabled", so nothing was delivered.
    assert!(!delivered.load(Ordering::SeqCst));
    assert_eq!(interrupts.pending_count(), 1);

    interrupts.restore(mask);
    assert!(delivered.load(Ordering::SeqCst));
}

#[test]
fn test_spin_readers_race_rebasing_writer() {
    const STEPS: u64 = 20_000;
    let step = 0x1000_0003u32;

    let service = Arc::new(TimeService::new(
        ManualCounter::new(0),
        SpinAnchor::new(Anchor::new(0, OsTime(0))),
        TickRate::default(),
    ));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let service = Arc::clone(&service);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut reads = Vec::new();
                while !done.load(Ordering::Acquire) {
                    reads.push(service.read_time());
                }
                reads
            })
        })
        .collect();

    // Writer: the counter moves less than one period between rebases.
    for _ in 0..STEPS {
        service.counter().advance(step);
        service.rebase();
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        let reads = reader.join().unwrap();
        assert_monotonic(&reads);
        if let Some(last) = reads.last() {
            assert!(last.ticks() <= STEPS * u64::from(step));
        }
    }
    assert_eq!(service.read_time(), OsTime(STEPS * u64::from(step)));
}
