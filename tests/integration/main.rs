//! Pulse integration test harness.
//!
//! Several detectors share one process and talk over the loopback bus.
//! Each node has its own registry, scripted probe and clock, and a
//! distinct process token so the nodes do not recognise each other as
//! local.

mod discovery;
mod failures;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};

use pulse_core::{DetectorConfig, EndpointMetadata, Identity, Locator};
use pulse_services::testing::{RecordingListener, ScriptedProbe};
use pulse_services::{
    Clock, Detector, LoopbackBus, LoopbackTransport, ManualClock, MembershipRegistry, SystemClock,
};

// ── Harness ───────────────────────────────────────────────────────────────────

pub const WAIT: Duration = Duration::from_secs(3);

pub struct Node {
    pub detector: Arc<Detector>,
    pub transport: Arc<LoopbackTransport>,
    pub registry: Arc<MembershipRegistry>,
    pub events: RecordingListener,
    pub probe: Arc<ScriptedProbe>,
    /// Present on nodes driven by a manual clock.
    pub clock: Option<Arc<ManualClock>>,
}

impl Node {
    /// A node whose time only moves through `advance`.
    pub fn manual(bus: &Arc<LoopbackBus>, domain: &str, name: &str, config: DetectorConfig) -> Self {
        let clock = Arc::new(ManualClock::new());
        Self::build(bus, domain, name, config, clock.clone(), Some(clock))
    }

    /// A node on the real clock, for runs with started detectors.
    pub fn live(bus: &Arc<LoopbackBus>, domain: &str, name: &str, config: DetectorConfig) -> Self {
        Self::build(bus, domain, name, config, Arc::new(SystemClock), None)
    }

    fn build(
        bus: &Arc<LoopbackBus>,
        domain: &str,
        name: &str,
        config: DetectorConfig,
        clock: Arc<dyn Clock>,
        manual: Option<Arc<ManualClock>>,
    ) -> Self {
        let identity = Identity::new(Some(domain), name, format!("proc-{name}"));
        let registry = MembershipRegistry::shared(identity.clone());
        let events = RecordingListener::new();
        registry.subscribe(events.clone());

        let transport = bus.transport();
        let probe = Arc::new(ScriptedProbe::new());
        let detector = Arc::new(
            Detector::builder(identity, transport.clone(), probe.clone())
                .config(config)
                .membership(registry.clone())
                .clock(clock)
                .build(),
        );
        bus.connect(&detector);

        Self {
            detector,
            transport,
            registry,
            events,
            probe,
            clock: manual,
        }
    }

    pub fn identity(&self) -> Identity {
        self.detector.identity()
    }

    pub fn advance(&self, by: Duration) {
        match &self.clock {
            Some(clock) => clock.advance(by),
            None => panic!("advance() on a live node"),
        }
    }
}

pub fn config(heartbeat_ms: u64, stale_ms: u64) -> DetectorConfig {
    DetectorConfig::new(
        Duration::from_millis(heartbeat_ms),
        Duration::from_millis(stale_ms),
    )
    .unwrap()
}

pub fn locator(host: &str, port: u16) -> Locator {
    Locator::new("socket", host, port)
}

pub fn endpoint(host: &str, port: u16, subsystem: &str) -> EndpointMetadata {
    EndpointMetadata::new(locator(host, port), [subsystem])
}

/// Poll `condition` every 10 ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
