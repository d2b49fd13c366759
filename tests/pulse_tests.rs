use std::sync::Arc;

use edgesense::backend::mock::{ClaimEvent, EdgeInjector, MockBackend};
use edgesense::backend::Level;
use edgesense::{BackendSelector, CounterState, Edge, GpioPolicy, LineConfig, Pull, PulseCounter};

fn line(gpio: u32, edge: Edge) -> LineConfig {
    LineConfig {
        name: format!("line-{gpio}"),
        gpio,
        pull: Pull::Up,
        edge,
        debounce_us: 2000,
    }
}

fn policy(backends: &[&str]) -> GpioPolicy {
    GpioPolicy {
        backends: backends.iter().map(|s| s.to_string()).collect(),
        ..GpioPolicy::default()
    }
}

fn injected(slot: &parking_lot::Mutex<Option<EdgeInjector>>) -> EdgeInjector {
    slot.lock().clone().expect("a claim delivered an injector")
}

#[test]
fn snapshot_returns_pulses_since_last_call() {
    let backend = MockBackend::new("b1");
    let injector = backend.injector();
    let selector = BackendSelector::new(vec![Box::new(backend)]);

    let mut counter = PulseCounter::new(line(17, Edge::Falling));
    counter.start(&selector, &policy(&["b1"]));
    assert_eq!(counter.state(), CounterState::Bound);

    let edges = injected(&injector);
    for _ in 0..5 {
        edges.edge(Level::Low);
    }
    assert_eq!(counter.snapshot_and_reset(), 5);
    assert_eq!(counter.snapshot_and_reset(), 0);
}

#[test]
fn no_pulse_is_lost_or_double_counted_across_snapshots() {
    let backend = MockBackend::new("b1");
    let injector = backend.injector();
    let selector = BackendSelector::new(vec![Box::new(backend)]);

    let mut counter = PulseCounter::new(line(17, Edge::Falling));
    counter.start(&selector, &policy(&["b1"]));
    let edges = injected(&injector);

    const TOTAL: u64 = 10_000;
    let producer = std::thread::spawn(move || {
        for _ in 0..TOTAL {
            edges.edge(Level::Low);
        }
    });

    // snapshot concurrently with delivery; the sum over all snapshots must
    // come out exact
    let mut collected = 0u64;
    while !producer.is_finished() {
        collected += counter.snapshot_and_reset();
        std::thread::yield_now();
    }
    producer.join().unwrap();
    collected += counter.snapshot_and_reset();

    assert_eq!(collected, TOTAL);
    assert_eq!(counter.snapshot_and_reset(), 0);
}

#[test]
fn first_available_family_wins_and_no_other_claim_persists() {
    let b1 = MockBackend::new("b1").unreachable();
    let b2 = MockBackend::new("b2");
    let b3 = MockBackend::new("b3");
    let (l1, l2, l3) = (b1.ledger(), b2.ledger(), b3.ledger());

    let selector = BackendSelector::new(vec![Box::new(b1), Box::new(b2), Box::new(b3)]);
    let mut counter = PulseCounter::new(line(17, Edge::Falling));
    counter.start(&selector, &policy(&["b1", "b2", "b3"]));

    assert_eq!(counter.state(), CounterState::Bound);
    assert_eq!(counter.bound_via(), Some("b2"));
    assert_eq!(l1.live_claims(), 0);
    assert_eq!(l2.live_claims(), 1);
    assert_eq!(l3.live_claims(), 0);
    // the winner ends the search: b3 is never probed
    assert!(l3.events().is_empty());
}

#[test]
fn chip_override_orders_the_attempt_sequence() {
    let backend = MockBackend::new("gpiod").with_chips(&[0, 1, 2, 3], &[]);
    let ledger = backend.ledger();
    let selector = BackendSelector::new(vec![Box::new(backend)]);

    let mut counter = PulseCounter::new(line(17, Edge::Falling));
    counter.start(
        &selector,
        &GpioPolicy {
            backends: vec!["gpiod".to_string()],
            chip_priority: vec![2, 0],
            ..GpioPolicy::default()
        },
    );
    assert_eq!(counter.state(), CounterState::Failed);

    let attempted: Vec<u32> = ledger
        .events()
        .iter()
        .filter_map(|e| match e {
            ClaimEvent::Rejected { chip, .. } => *chip,
            _ => None,
        })
        .collect();
    assert_eq!(attempted, vec![2, 0, 1, 3]);
    assert_eq!(ledger.live_claims(), 0);
}

#[test]
fn skipped_family_is_never_probed() {
    let pigpio = MockBackend::new("pigpio");
    let fallback = MockBackend::new("rppal");
    let pigpio_ledger = pigpio.ledger();

    let selector = BackendSelector::new(vec![Box::new(pigpio), Box::new(fallback)]);
    let mut counter = PulseCounter::new(line(17, Edge::Falling));
    counter.start(
        &selector,
        &GpioPolicy {
            backends: vec!["pigpio".to_string(), "rppal".to_string()],
            skip: ["pigpio".to_string()].into(),
            ..GpioPolicy::default()
        },
    );

    assert_eq!(counter.state(), CounterState::Bound);
    assert_eq!(counter.bound_via(), Some("rppal"));
    assert!(pigpio_ledger.events().is_empty());
}

#[test]
fn exhausted_bind_freezes_the_counter_at_zero() {
    let b1 = MockBackend::new("b1").unreachable();
    let b2 = MockBackend::new("b2").rejecting();
    let ledger = b2.ledger();

    let selector = BackendSelector::new(vec![Box::new(b1), Box::new(b2)]);
    let mut counter = PulseCounter::new(line(17, Edge::Falling));
    counter.start(&selector, &policy(&["b1", "b2"]));

    assert_eq!(counter.state(), CounterState::Failed);
    assert_eq!(ledger.live_claims(), 0);
    for _ in 0..3 {
        assert_eq!(counter.snapshot_and_reset(), 0);
    }
}

#[test]
fn wrong_direction_events_do_not_count() {
    let backend = MockBackend::new("b1");
    let injector = backend.injector();
    let selector = BackendSelector::new(vec![Box::new(backend)]);

    let mut counter = PulseCounter::new(line(17, Edge::Falling));
    counter.start(&selector, &policy(&["b1"]));
    let edges = injected(&injector);

    edges.edge(Level::High);
    edges.edge(Level::Timeout);
    assert_eq!(counter.snapshot_and_reset(), 0);
    edges.edge(Level::Low);
    assert_eq!(counter.snapshot_and_reset(), 1);
}

#[test]
fn stop_cancels_delivery_before_release() {
    let backend = MockBackend::new("b1");
    let ledger = backend.ledger();
    let selector = BackendSelector::new(vec![Box::new(backend)]);

    let mut counter = PulseCounter::new(line(17, Edge::Falling));
    counter.start(&selector, &policy(&["b1"]));
    counter.stop();
    assert_eq!(counter.state(), CounterState::Stopped);
    assert_eq!(ledger.live_claims(), 0);

    let events = ledger.events();
    let cancelled = events
        .iter()
        .position(|e| matches!(e, ClaimEvent::Cancelled { .. }))
        .expect("stop cancels the callback registration");
    let released = events
        .iter()
        .position(|e| matches!(e, ClaimEvent::Released { .. }))
        .expect("stop releases the claim");
    assert!(cancelled < released);
}

#[test]
fn failed_chips_leak_nothing_before_the_winning_claim() {
    let backend = MockBackend::new("gpiod").with_chips(&[0, 1, 2], &[2]);
    let ledger = backend.ledger();
    let selector = BackendSelector::new(vec![Box::new(backend)]);

    let mut counter = PulseCounter::new(line(17, Edge::Falling));
    counter.start(&selector, &policy(&["gpiod"]));

    assert_eq!(counter.state(), CounterState::Bound);
    assert_eq!(counter.bound_via(), Some("gpiod chip 2"));
    assert_eq!(ledger.live_claims(), 1);
    counter.stop();
    assert_eq!(ledger.live_claims(), 0);
}

#[test]
fn unknown_families_in_the_priority_list_are_ignored() {
    let backend = MockBackend::new("rppal");
    let selector = BackendSelector::new(vec![Box::new(backend)]);

    let mut counter = PulseCounter::new(line(17, Edge::Falling));
    counter.start(&selector, &policy(&["lgpio", "rppal"]));
    assert_eq!(counter.state(), CounterState::Bound);
}

#[test]
fn flow_line_scenario_end_to_end() {
    // line 17, falling, debounce 2000µs; pigpio unreachable, chip-scoped
    // gpiod with chips [0, 1] of which only 1 accepts, override [1]
    let pigpio = MockBackend::new("pigpio").unreachable();
    let gpiod = MockBackend::new("gpiod").with_chips(&[0, 1], &[1]);
    let rppal = MockBackend::new("rppal");
    let gpiod_ledger = gpiod.ledger();
    let rppal_ledger = rppal.ledger();
    let injector = gpiod.injector();

    let selector =
        BackendSelector::new(vec![Box::new(pigpio), Box::new(gpiod), Box::new(rppal)]);
    let mut counter = PulseCounter::new(line(17, Edge::Falling));
    counter.start(
        &selector,
        &GpioPolicy {
            backends: vec!["pigpio".into(), "gpiod".into(), "rppal".into()],
            chip_priority: vec![1],
            ..GpioPolicy::default()
        },
    );

    assert_eq!(counter.state(), CounterState::Bound);
    assert_eq!(counter.bound_via(), Some("gpiod chip 1"));
    // override put chip 1 first, so chip 0 was never attempted
    assert!(matches!(
        gpiod_ledger.events().as_slice(),
        [
            ClaimEvent::Probed { .. },
            ClaimEvent::Claimed { chip: Some(1), line: 17, .. }
        ]
    ));
    assert!(rppal_ledger.events().is_empty());

    let edges = injected(&injector);
    for _ in 0..5 {
        edges.edge(Level::Low);
    }
    edges.edge(Level::High);

    assert_eq!(counter.snapshot_and_reset(), 5);
    assert_eq!(counter.snapshot_and_reset(), 0);

    counter.stop();
    assert_eq!(gpiod_ledger.live_claims(), 0);
}
