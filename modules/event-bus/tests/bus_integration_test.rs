//! Cross-thread bus behavior: required waits, delivery ordering, and
//! endpoint cleanup under concurrency.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use iris_event_bus::{
    cancel_waits_on_channel, key, signal_stats, BusHandle, EventBusError, Requirement,
};

#[test]
fn required_wait_returns_after_emit() {
    let mut waiter = BusHandle::new();
    let got = Arc::new(Mutex::new(None));
    let got2 = got.clone();
    waiter.subscribe::<bool, _>("it::ready", Requirement::Required, move |v| {
        *got2.lock() = Some(*v);
    });
    let waiter = Arc::new(waiter);

    let blocked = {
        let waiter = waiter.clone();
        thread::spawn(move || waiter.wait())
    };

    // Give the waiter a moment to block, then release it.
    thread::sleep(Duration::from_millis(20));
    let emitter = BusHandle::new();
    emitter.emit(&true, "it::ready");

    blocked.join().unwrap().unwrap();
    assert_eq!(*got.lock(), Some(true));
}

#[test]
fn wait_without_emit_returns_only_on_cancel() {
    let mut waiter = BusHandle::new();
    waiter.subscribe::<bool, _>("it::never-fires", Requirement::Required, |_| {});
    let waiter = Arc::new(waiter);

    let blocked = {
        let waiter = waiter.clone();
        thread::spawn(move || waiter.wait())
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!blocked.is_finished());

    waiter.cancel_waits();
    let result = blocked.join().unwrap();
    assert!(matches!(result, Err(EventBusError::WaitCancelled { .. })));
}

#[test]
fn channel_scoped_cancel_spares_other_channels() {
    let mut one = BusHandle::with_channel(1);
    one.subscribe::<bool, _>("it::chan-one", Requirement::Required, |_| {});
    let mut two = BusHandle::with_channel(2);
    two.subscribe::<bool, _>("it::chan-two", Requirement::Required, |_| {});
    let one = Arc::new(one);
    let two = Arc::new(two);

    let blocked_one = {
        let one = one.clone();
        thread::spawn(move || one.wait())
    };
    let blocked_two = {
        let two = two.clone();
        thread::spawn(move || two.wait())
    };

    thread::sleep(Duration::from_millis(20));
    cancel_waits_on_channel(1);

    let result = blocked_one.join().unwrap();
    assert!(matches!(result, Err(EventBusError::WaitCancelled { .. })));

    // Channel 2's required wait is still blocked; only its own payload
    // releases it.
    thread::sleep(Duration::from_millis(50));
    assert!(!blocked_two.is_finished());

    let emitter = BusHandle::new();
    emitter.emit(&true, "it::chan-two");
    blocked_two.join().unwrap().unwrap();
}

#[test]
fn wait_fires_once_per_emit() {
    let mut waiter = BusHandle::new();
    let deliveries = Arc::new(AtomicU32::new(0));
    let deliveries2 = deliveries.clone();
    waiter.subscribe::<u32, _>("it::once-per-emit", Requirement::Required, move |_| {
        deliveries2.fetch_add(1, Ordering::SeqCst);
    });

    let emitter = BusHandle::new();
    emitter.emit(&1u32, "it::once-per-emit");
    waiter.wait().unwrap();

    // The flag was consumed; a second wait needs a second emit.
    emitter.emit(&2u32, "it::once-per-emit");
    waiter.wait().unwrap();
    assert_eq!(deliveries.load(Ordering::SeqCst), 2);
}

#[test]
fn subscribers_on_one_key_see_emits_in_arrival_order() {
    let mut receiver = BusHandle::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    receiver.subscribe::<u32, _>("it::ordering", Requirement::Optional, move |v| {
        seen2.lock().push(*v);
    });

    let threads: Vec<_> = (0..4u32)
        .map(|worker| {
            thread::spawn(move || {
                let emitter = BusHandle::new();
                for i in 0..50u32 {
                    emitter.emit(&(worker * 100 + i), "it::ordering");
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    // Per-emitter order is preserved within the global arrival order.
    let seen = seen.lock();
    assert_eq!(seen.len(), 200);
    for worker in 0..4u32 {
        let from_worker: Vec<_> = seen
            .iter()
            .filter(|v| **v / 100 == worker)
            .copied()
            .collect();
        let mut expected: Vec<_> = (0..50u32).map(|i| worker * 100 + i).collect();
        expected.sort_unstable();
        assert_eq!(from_worker, expected);
    }
}

#[test]
fn value_round_trips_bitwise_to_typed_and_universal_subscribers() {
    let mut receiver = BusHandle::new();
    let typed = Arc::new(Mutex::new(None));
    let universal_hits = Arc::new(AtomicU32::new(0));
    let typed2 = typed.clone();
    let universal_hits2 = universal_hits.clone();

    receiver.subscribe::<f64, _>("it::round-trip", Requirement::Optional, move |v| {
        *typed2.lock() = Some(*v);
    });
    receiver.subscribe_universal("it::round-trip", Requirement::Optional, move |payload, _| {
        assert!(payload.downcast_ref::<f64>().is_some());
        universal_hits2.fetch_add(1, Ordering::SeqCst);
    });

    let emitter = BusHandle::new();
    emitter.emit(&0.1234567891011_f64, "it::round-trip");

    assert_eq!(*typed.lock(), Some(0.1234567891011_f64));
    assert_eq!(universal_hits.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_enroll_and_emit_on_one_key_is_safe() {
    let stop = Arc::new(AtomicU32::new(0));
    let emitter_stop = stop.clone();
    let emitter = thread::spawn(move || {
        let bus = BusHandle::new();
        while emitter_stop.load(Ordering::SeqCst) == 0 {
            bus.emit(&1u32, "it::enroll-race");
        }
    });

    for _ in 0..100 {
        let mut bus = BusHandle::new();
        bus.subscribe::<u32, _>("it::enroll-race", Requirement::Optional, |_| {});
        bus.reset();
    }

    stop.store(1, Ordering::SeqCst);
    emitter.join().unwrap();
    assert!(signal_stats("it::enroll-race").is_none());
}

#[test]
fn emit_throughput_smoke() {
    let mut receiver = BusHandle::new();
    let hits = Arc::new(AtomicU32::new(0));
    let hits2 = hits.clone();
    receiver.subscribe::<u64, _>("it::throughput", Requirement::Optional, move |_| {
        hits2.fetch_add(1, Ordering::Relaxed);
    });

    const EMITS: u64 = 100_000;
    let emitter = BusHandle::new();
    let start = std::time::Instant::now();
    for i in 0..EMITS {
        emitter.emit(&i, "it::throughput");
    }
    let elapsed = start.elapsed();

    assert_eq!(hits.load(Ordering::Relaxed) as u64, EMITS);
    // Loose sanity bound: delivery is a locked vector scan plus one
    // callback, and should stay well under a millisecond per emit.
    assert!(
        elapsed < Duration::from_secs(30),
        "bus took {elapsed:?} for {EMITS} emits"
    );
}

#[test]
fn handles_are_isolated_but_share_the_key_space() {
    let mut a = BusHandle::with_channel(1);
    let mut b = BusHandle::with_channel(2);
    let hits_a = Arc::new(AtomicU32::new(0));
    let hits_b = Arc::new(AtomicU32::new(0));
    let hits_a2 = hits_a.clone();
    let hits_b2 = hits_b.clone();

    a.subscribe::<u32, _>(key!["it::", "shared"], Requirement::Optional, move |_| {
        hits_a2.fetch_add(1, Ordering::SeqCst);
    });
    b.subscribe::<u32, _>(key!["it::", "shared"], Requirement::Optional, move |_| {
        hits_b2.fetch_add(1, Ordering::SeqCst);
    });

    // Endpoints cross handle (and graph) boundaries through the global
    // registry, regardless of channel.
    let emitter = BusHandle::with_channel(9);
    emitter.emit(&1u32, "it::shared");
    assert_eq!(hits_a.load(Ordering::SeqCst), 1);
    assert_eq!(hits_b.load(Ordering::SeqCst), 1);

    // Tearing one handle down leaves the other's endpoint alone.
    a.reset();
    emitter.emit(&2u32, "it::shared");
    assert_eq!(hits_a.load(Ordering::SeqCst), 1);
    assert_eq!(hits_b.load(Ordering::SeqCst), 2);
    assert_eq!(signal_stats("it::shared"), Some((1, 0)));
}
