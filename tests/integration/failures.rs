use std::time::Duration;

use pulse_core::ChangeKind;
use pulse_services::LoopbackBus;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Partial and transient failures
// ══════════════════════════════════════════════════════════════════════════════

/// One of two endpoints dies: the peer stays, advertising only the live one.
#[tokio::test]
async fn test_partial_failure_narrows() {
    let bus = LoopbackBus::new();
    let a = Node::manual(&bus, "d1", "node-a", config(100, 500));
    let b = Node::manual(&bus, "d1", "node-b", config(100, 500));

    a.transport
        .start_endpoint(endpoint("10.0.0.1", 4446, "sub1"));
    a.transport
        .start_endpoint(endpoint("10.0.0.1", 4447, "sub1"));
    a.detector.heartbeat();

    b.probe.set_down(&locator("10.0.0.1", 4447));
    b.advance(Duration::from_millis(600));
    let report = b.detector.sweep();
    assert_eq!(report.narrowed, 1);

    let entry = b.registry.get(&a.identity()).unwrap();
    assert_eq!(entry.locators(), vec![locator("10.0.0.1", 4446)]);

    assert!(b.events.wait_for(2, WAIT).await);
    let events = b.events.events();
    assert_eq!(events[1].kind, ChangeKind::Updated);
    assert_eq!(events[1].endpoints.len(), 1);
    assert_eq!(b.events.count(ChangeKind::Removed), 0);

    // The narrowed record is fresh again and is not re-probed yet.
    assert_eq!(b.detector.sweep().stale, 0);
}

/// A stale peer that still answers probes is kept and not re-announced.
#[tokio::test]
async fn test_quiet_but_reachable_peer_kept() {
    let bus = LoopbackBus::new();
    let a = Node::manual(&bus, "d1", "node-a", config(100, 500));
    let b = Node::manual(&bus, "d1", "node-b", config(100, 500));

    a.transport
        .start_endpoint(endpoint("10.0.0.1", 4446, "sub1"));
    a.detector.heartbeat();

    b.advance(Duration::from_secs(5));
    assert_eq!(b.detector.sweep().refreshed, 1);
    assert!(b.registry.has(&a.identity()));

    assert!(b.events.wait_for(1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(b.events.kinds(), vec![ChangeKind::Added]);
}

/// A peer that comes back after being declared dead is added again.
#[tokio::test]
async fn test_dead_peer_rejoins() {
    let bus = LoopbackBus::new();
    let a = Node::manual(&bus, "d1", "node-a", config(100, 500));
    let b = Node::manual(&bus, "d1", "node-b", config(100, 500));
    let loc = locator("10.0.0.1", 4446);

    a.transport
        .start_endpoint(endpoint("10.0.0.1", 4446, "sub1"));
    a.detector.heartbeat();

    b.probe.set_down(&loc);
    b.advance(Duration::from_millis(500));
    assert_eq!(b.detector.sweep().removed, 1);

    b.probe.set_up(&loc);
    a.detector.heartbeat();
    assert!(b.registry.has(&a.identity()));

    assert!(b.events.wait_for(3, WAIT).await);
    assert_eq!(
        b.events.kinds(),
        vec![ChangeKind::Added, ChangeKind::Removed, ChangeKind::Added]
    );
}

/// A probe that blows up on one peer does not stop the sweep of the others.
#[tokio::test]
async fn test_panicking_probe_isolated() {
    let bus = LoopbackBus::new();
    let a = Node::manual(&bus, "d1", "node-a", config(100, 500));
    let c = Node::manual(&bus, "d1", "node-c", config(100, 500));
    let b = Node::manual(&bus, "d1", "node-b", config(100, 500));

    a.transport
        .start_endpoint(endpoint("10.0.0.1", 4446, "sub1"));
    c.transport
        .start_endpoint(endpoint("10.0.0.3", 4446, "sub1"));
    a.detector.heartbeat();
    c.detector.heartbeat();

    b.probe.set_panicking(&locator("10.0.0.1", 4446));
    b.advance(Duration::from_millis(500));

    let report = b.detector.sweep();
    assert_eq!(report.stale, 2);
    assert_eq!(report.removed, 1);
    assert_eq!(report.refreshed, 1);
    assert!(!b.registry.has(&a.identity()));
    assert!(b.registry.has(&c.identity()));
}
