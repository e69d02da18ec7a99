//! In-process heartbeat bus.
//!
//! Connects several detectors living in one process without touching the
//! network. Every broadcast is delivered synchronously to every connected
//! detector, the sender included; self-filtering is the detector's job.

use std::sync::{Arc, RwLock, Weak};

use anyhow::Result;
use pulse_core::{Detection, EndpointMetadata, Locator};

use crate::detector::Detector;
use crate::transport::Transport;

#[derive(Default)]
pub struct LoopbackBus {
    members: RwLock<Vec<Weak<Detector>>>,
}

impl LoopbackBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A transport attached to this bus with no endpoints started yet.
    pub fn transport(self: &Arc<Self>) -> Arc<LoopbackTransport> {
        Arc::new(LoopbackTransport {
            bus: self.clone(),
            endpoints: RwLock::new(Vec::new()),
        })
    }

    /// Deliver future broadcasts to `detector`.
    pub fn connect(&self, detector: &Arc<Detector>) {
        self.members
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::downgrade(detector));
    }

    /// Number of detectors still alive on the bus.
    pub fn connected(&self) -> usize {
        self.members
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.strong_count() > 0)
            .count()
    }

    fn deliver(&self, detection: &Detection) -> usize {
        let members: Vec<Arc<Detector>> = {
            let mut members = self.members.write().unwrap_or_else(|e| e.into_inner());
            members.retain(|m| m.strong_count() > 0);
            members.iter().filter_map(Weak::upgrade).collect()
        };
        for detector in &members {
            detector.detect(detection.clone());
        }
        members.len()
    }
}

pub struct LoopbackTransport {
    bus: Arc<LoopbackBus>,
    endpoints: RwLock<Vec<EndpointMetadata>>,
}

impl LoopbackTransport {
    /// Start serving `endpoint`. Replaces an endpoint with the same locator.
    pub fn start_endpoint(&self, endpoint: EndpointMetadata) {
        let mut endpoints = self.endpoints.write().unwrap_or_else(|e| e.into_inner());
        endpoints.retain(|e| e.locator != endpoint.locator);
        endpoints.push(endpoint);
    }

    /// Stop serving the endpoint at `locator`. Returns false if none was started.
    pub fn stop_endpoint(&self, locator: &Locator) -> bool {
        let mut endpoints = self.endpoints.write().unwrap_or_else(|e| e.into_inner());
        let before = endpoints.len();
        endpoints.retain(|e| &e.locator != locator);
        endpoints.len() != before
    }
}

impl Transport for LoopbackTransport {
    fn local_endpoints(&self) -> Vec<EndpointMetadata> {
        self.endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn broadcast(&self, detection: &Detection) -> Result<()> {
        let delivered = self.bus.deliver(detection);
        tracing::trace!(delivered, "loopback heartbeat delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MembershipRegistry;
    use crate::testing::ScriptedProbe;
    use pulse_core::Identity;

    type Node = (Arc<Detector>, Arc<LoopbackTransport>, Arc<MembershipRegistry>);

    fn node(bus: &Arc<LoopbackBus>, name: &str) -> Node {
        let identity = Identity::new(Some("d1"), name, format!("proc-{name}"));
        let registry = MembershipRegistry::shared(identity.clone());
        let transport = bus.transport();
        let detector = Arc::new(
            Detector::builder(identity, transport.clone(), Arc::new(ScriptedProbe::new()))
                .membership(registry.clone())
                .build(),
        );
        bus.connect(&detector);
        (detector, transport, registry)
    }

    #[test]
    fn heartbeat_reaches_every_other_detector() {
        let bus = LoopbackBus::new();
        let (a, a_transport, a_registry) = node(&bus, "a");
        let (_b, _, b_registry) = node(&bus, "b");
        let (_c, _, c_registry) = node(&bus, "c");

        a_transport.start_endpoint(EndpointMetadata::new(
            Locator::new("socket", "127.0.0.1", 4446),
            ["sub1"],
        ));
        assert!(a.heartbeat());

        assert_eq!(b_registry.len(), 1);
        assert_eq!(c_registry.len(), 1);
        assert!(b_registry.has(&a.identity()));
        // Delivered to the sender too, and filtered there as its own.
        assert!(a_registry.is_empty());
    }

    #[test]
    fn stopped_endpoints_are_not_advertised() {
        let bus = LoopbackBus::new();
        let transport = bus.transport();
        let locator = Locator::new("socket", "127.0.0.1", 4446);

        transport.start_endpoint(EndpointMetadata::new(locator.clone(), ["x"]));
        transport.start_endpoint(EndpointMetadata::new(locator.clone(), ["y"]));
        assert_eq!(transport.local_endpoints().len(), 1);

        assert!(transport.stop_endpoint(&locator));
        assert!(!transport.stop_endpoint(&locator));
        assert!(transport.local_endpoints().is_empty());
    }

    #[test]
    fn dropped_detectors_leave_the_bus() {
        let bus = LoopbackBus::new();
        let (a, _, _) = node(&bus, "a");
        let (b, _, _) = node(&bus, "b");
        assert_eq!(bus.connected(), 2);

        drop(b);
        assert_eq!(bus.connected(), 1);
        drop(a);
        assert_eq!(bus.connected(), 0);
    }
}
