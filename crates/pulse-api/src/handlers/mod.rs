//! HTTP API handlers: exposes detector and membership state as JSON.

pub mod members;
pub mod status;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use pulse_core::{EndpointMetadata, MembershipEntry};
use pulse_services::{Detector, MembershipRegistry};

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<MembershipRegistry>,
    pub detector: Arc<Detector>,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(registry: Arc<MembershipRegistry>, detector: Arc<Detector>) -> Self {
        Self {
            registry,
            detector,
            started_at: Instant::now(),
        }
    }
}

// ── Shared response types ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct MemberInfo {
    pub identity: String,
    pub domain: Option<String>,
    pub instance_id: String,
    pub endpoints: Vec<EndpointInfo>,
}

#[derive(Debug, Serialize)]
pub struct EndpointInfo {
    pub locator: String,
    pub subsystems: Vec<String>,
}

impl From<&EndpointMetadata> for EndpointInfo {
    fn from(endpoint: &EndpointMetadata) -> Self {
        Self {
            locator: endpoint.locator.to_string(),
            subsystems: endpoint.subsystems.iter().cloned().collect(),
        }
    }
}

impl From<&MembershipEntry> for MemberInfo {
    fn from(entry: &MembershipEntry) -> Self {
        Self {
            identity: entry.identity.to_string(),
            domain: entry.identity.domain().map(str::to_string),
            instance_id: entry.identity.instance_id().to_string(),
            endpoints: entry.endpoints.iter().map(EndpointInfo::from).collect(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_state {
    use std::sync::Arc;

    use pulse_core::{DetectorConfig, Identity};
    use pulse_services::testing::{RecordingTransport, ScriptedProbe};
    use pulse_services::{Detector, MembershipRegistry};

    use super::ApiState;

    pub fn state(transport: Arc<RecordingTransport>) -> ApiState {
        let local = Identity::local(Some("d1"), "api-test");
        let registry = MembershipRegistry::shared(local.clone());
        let detector = Detector::builder(local, transport, Arc::new(ScriptedProbe::new()))
            .config(DetectorConfig::default())
            .membership(registry.clone())
            .build();
        ApiState::new(registry, Arc::new(detector))
    }
}
