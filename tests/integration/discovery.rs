use std::time::Duration;

use pulse_core::ChangeKind;
use pulse_services::LoopbackBus;

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Discovery
// ══════════════════════════════════════════════════════════════════════════════

/// A heartbeat from A lands in B's registry, and A's death is noticed once.
#[tokio::test]
async fn test_discover_then_lose_peer() {
    let bus = LoopbackBus::new();
    let a = Node::manual(&bus, "d1", "node-a", config(100, 500));
    let b = Node::manual(&bus, "d1", "node-b", config(100, 500));

    let loc_a = locator("10.0.0.1", 4446);
    a.transport
        .start_endpoint(endpoint("10.0.0.1", 4446, "sub1"));
    assert!(a.detector.heartbeat());

    let members = b.registry.all();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].identity, a.identity());
    assert!(members[0].supports("sub1"));

    // A goes silent and its endpoint stops answering.
    b.probe.set_down(&loc_a);
    b.advance(Duration::from_millis(500));
    let report = b.detector.sweep();
    assert_eq!(report.removed, 1);
    assert!(b.registry.all().is_empty());

    assert!(b.events.wait_for(2, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(b.events.kinds(), vec![ChangeKind::Added, ChangeKind::Removed]);
    let removed = &b.events.events()[1];
    assert_eq!(removed.identity, a.identity());
    assert_eq!(removed.endpoints[0].locator, loc_a);
}

/// Same scenario with both detectors running on real timers.
#[tokio::test]
async fn test_discover_then_lose_peer_live() {
    let bus = LoopbackBus::new();
    let a = Node::live(&bus, "d1", "node-a", config(50, 200));
    let b = Node::live(&bus, "d1", "node-b", config(50, 200));

    let loc_a = locator("10.0.0.1", 4446);
    a.transport
        .start_endpoint(endpoint("10.0.0.1", 4446, "sub1"));
    a.detector.start().unwrap();
    b.detector.start().unwrap();

    wait_until(WAIT, || b.registry.has(&a.identity())).await.unwrap();

    a.detector.stop();
    b.probe.set_down(&loc_a);

    wait_until(WAIT, || b.registry.is_empty()).await.unwrap();
    assert!(b.detector.tracked_peers().is_empty());

    tokio::time::sleep(Duration::from_millis(300)).await;
    b.detector.stop();
    assert_eq!(b.events.count(ChangeKind::Removed), 1);
    assert_eq!(b.events.count(ChangeKind::Added), 1);
}

/// Starting a second endpoint on A shows up in B's registry as one update.
#[tokio::test]
async fn test_new_endpoint_is_propagated() {
    let bus = LoopbackBus::new();
    let a = Node::manual(&bus, "d1", "node-a", config(100, 500));
    let b = Node::manual(&bus, "d1", "node-b", config(100, 500));

    a.transport
        .start_endpoint(endpoint("10.0.0.1", 4446, "sub1"));
    a.detector.heartbeat();
    a.detector.heartbeat();

    a.transport
        .start_endpoint(endpoint("10.0.0.1", 4447, "sub2"));
    a.detector.heartbeat();

    assert!(b.events.wait_for(2, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(b.events.kinds(), vec![ChangeKind::Added, ChangeKind::Updated]);

    let entry = b.registry.get(&a.identity()).unwrap();
    assert_eq!(entry.endpoints.len(), 2);
    assert_eq!(b.registry.query_subsystem("sub2").len(), 1);
}

/// A detector never lists itself unless told to accept its own heartbeats.
#[tokio::test]
async fn test_self_heartbeat_filtered() {
    let bus = LoopbackBus::new();
    let a = Node::manual(&bus, "d1", "node-a", config(100, 500));
    a.transport
        .start_endpoint(endpoint("10.0.0.1", 4446, "sub1"));

    a.detector.heartbeat();
    assert!(a.registry.is_empty());

    let b = Node::manual(&bus, "d1", "node-b", config(100, 500).with_accept_local(true));
    b.transport
        .start_endpoint(endpoint("10.0.0.2", 4446, "sub1"));
    b.detector.heartbeat();
    assert!(b.registry.has(&b.identity()));
    assert!(a.registry.has(&b.identity()));
}

/// Only heartbeats from accepted domains are tracked once started.
#[tokio::test]
async fn test_foreign_domain_ignored() {
    let bus = LoopbackBus::new();
    let a = Node::manual(&bus, "d1", "node-a", config(100, 500));
    let b = Node::manual(&bus, "d1", "node-b", config(100, 500));
    let c = Node::manual(&bus, "d2", "node-c", config(100, 500));

    b.detector.start().unwrap();
    for node in [&a, &c] {
        node.transport
            .start_endpoint(endpoint("10.0.0.3", 4446, "sub1"));
        node.detector.heartbeat();
    }
    b.detector.stop();

    assert!(b.registry.has(&a.identity()));
    assert!(!b.registry.has(&c.identity()));
}

/// Moving to another domain evicts members outside it with one event.
#[tokio::test]
async fn test_domain_change_evicts() {
    let bus = LoopbackBus::new();
    let a = Node::manual(&bus, "d1", "node-a", config(100, 500));
    let c = Node::manual(&bus, "d2", "node-c", config(100, 500));
    let b = Node::manual(
        &bus,
        "d1",
        "node-b",
        config(100, 500).with_domains(["d1", "d2"]),
    );

    for (node, port) in [(&a, 1), (&c, 2)] {
        node.transport
            .start_endpoint(endpoint("10.0.0.4", port, "sub1"));
        node.detector.heartbeat();
    }
    assert_eq!(b.registry.len(), 2);
    assert!(b.events.wait_for(2, WAIT).await);
    b.events.clear();

    assert_eq!(b.detector.change_domain("d2"), 1);

    let members = b.registry.all();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].identity, c.identity());

    assert!(b.events.wait_for(1, WAIT).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(b.events.kinds(), vec![ChangeKind::DomainChanged]);
}

/// A peer evicted by a domain change is announced again once the node
/// returns to the peer's domain.
#[tokio::test]
async fn test_domain_round_trip_readds_peer() {
    let bus = LoopbackBus::new();
    let a = Node::manual(&bus, "d1", "node-a", config(100, 500));
    let b = Node::manual(
        &bus,
        "d1",
        "node-b",
        config(100, 500).with_domains(["d1", "d2"]),
    );
    a.transport
        .start_endpoint(endpoint("10.0.0.5", 1, "sub1"));
    a.detector.heartbeat();
    assert!(b.registry.has(&a.identity()));

    b.detector.change_domain("d2");
    b.detector.change_domain("d1");
    assert!(b.registry.is_empty());

    for _ in 0..5 {
        a.detector.heartbeat();
    }
    assert!(b.registry.has(&a.identity()));
    assert_eq!(b.detector.tracked_peers(), vec![a.identity()]);
}

/// After moving domains a node announces itself under the new one.
#[tokio::test]
async fn test_moved_node_is_seen_in_new_domain() {
    let bus = LoopbackBus::new();
    let a = Node::manual(&bus, "d1", "node-a", config(100, 500));
    let c = Node::manual(&bus, "d2", "node-c", config(100, 500).with_domains(["d2"]));
    a.transport
        .start_endpoint(endpoint("10.0.0.6", 1, "sub1"));

    a.detector.heartbeat();
    assert!(c.registry.is_empty());

    a.detector.change_domain("d2");
    a.detector.heartbeat();
    let members = c.registry.all();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].identity.domain(), Some("d2"));
    assert_eq!(members[0].identity, a.identity());
}
