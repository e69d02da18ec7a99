//! Collaborator traits the detector is wired to.
//!
//! The daemon supplies UDP multicast and TCP implementations; the loopback
//! module supplies an in-process pair for embedding and tests.

use std::time::Duration;

use anyhow::Result;
use pulse_core::{Detection, EndpointMetadata, Locator};

/// Carries heartbeats between processes.
///
/// Inbound heartbeats are not pulled through this trait. The transport owns
/// its receive path and hands every decoded Detection to `Detector::detect`.
pub trait Transport: Send + Sync {
    /// Endpoints currently started in this process, with their subsystems.
    fn local_endpoints(&self) -> Vec<EndpointMetadata>;

    /// Send one heartbeat to every reachable peer.
    fn broadcast(&self, detection: &Detection) -> Result<()>;
}

/// Synchronous reachability check for one endpoint.
///
/// Ordinary unreachability is `Ok(false)`. Errors and panics are both
/// treated by the caller as "locator down".
pub trait ConnectionProbe: Send + Sync {
    fn probe(&self, locator: &Locator, timeout: Duration) -> Result<bool>;
}
