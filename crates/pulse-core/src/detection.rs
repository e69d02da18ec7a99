//! Heartbeat messages and the membership snapshots built from them.

use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::locator::{EndpointMetadata, Locator};

/// Milliseconds since the Unix epoch. Saturates to 0 on a pre-epoch clock.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Detection ─────────────────────────────────────────────────────────────────

/// A heartbeat: "this identity is alive and offers these endpoints".
///
/// Equality and hashing look at the identity only. Two detections for the
/// same identity occupy the same slot whatever endpoints they carry, so a
/// detection can serve as its own key for "latest state of this peer".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    identity: Identity,
    endpoints: Vec<EndpointMetadata>,
}

impl Detection {
    pub fn new(identity: Identity, endpoints: Vec<EndpointMetadata>) -> Self {
        Self {
            identity,
            endpoints,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn endpoints(&self) -> &[EndpointMetadata] {
        &self.endpoints
    }

    pub fn locators(&self) -> Vec<Locator> {
        self.endpoints.iter().map(|e| e.locator.clone()).collect()
    }

    /// Wrapping sum of each endpoint's locator hash.
    ///
    /// Order-insensitive and cheap. Distinct endpoint sets can collide, and
    /// subsystem changes are invisible to it.
    pub fn fingerprint(&self) -> u64 {
        self.endpoints
            .iter()
            .fold(0u64, |acc, e| acc.wrapping_add(e.locator.stable_hash()))
    }

    /// Structural comparison of the advertised endpoints, order included.
    pub fn same_endpoints(&self, other: &Detection) -> bool {
        self.endpoints == other.endpoints
    }

    /// Copy of this detection keeping only endpoints whose locator passes `keep`.
    pub fn retain_locators(&self, keep: impl Fn(&Locator) -> bool) -> Detection {
        Detection {
            identity: self.identity.clone(),
            endpoints: self
                .endpoints
                .iter()
                .filter(|e| keep(&e.locator))
                .cloned()
                .collect(),
        }
    }
}

impl PartialEq for Detection {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for Detection {}

impl Hash for Detection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

/// How a detector decides that a known peer's advertisement changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDetection {
    /// Compare additive locator-hash fingerprints.
    #[default]
    Fingerprint,
    /// Compare the endpoint lists structurally, subsystems included.
    Exact,
}

// ── Membership snapshots ──────────────────────────────────────────────────────

/// Immutable public view of one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipEntry {
    pub identity: Identity,
    pub endpoints: Vec<EndpointMetadata>,
}

impl MembershipEntry {
    pub fn new(identity: Identity, endpoints: Vec<EndpointMetadata>) -> Self {
        Self {
            identity,
            endpoints,
        }
    }

    pub fn locators(&self) -> Vec<Locator> {
        self.endpoints.iter().map(|e| e.locator.clone()).collect()
    }

    /// Does any endpoint of this member serve `subsystem`?
    pub fn supports(&self, subsystem: &str) -> bool {
        self.endpoints.iter().any(|e| e.supports(subsystem))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
    DomainChanged,
}

/// Notification delivered to membership subscribers.
///
/// For `Removed` the endpoints are the member's last known list. For
/// `DomainChanged` the identity is the local process moved into its new
/// domain and the endpoints are empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub identity: Identity,
    pub endpoints: Vec<EndpointMetadata>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, identity: Identity, endpoints: Vec<EndpointMetadata>) -> Self {
        Self {
            kind,
            identity,
            endpoints,
            timestamp: now_millis(),
        }
    }
}
