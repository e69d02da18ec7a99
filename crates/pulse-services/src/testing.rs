//! Test doubles for the detector's collaborators.
//!
//! Enabled for this crate's own tests and, through the `test-utils`
//! feature, for downstream test suites.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{bail, Result};
use pulse_core::{ChangeEvent, ChangeKind, Detection, EndpointMetadata, Identity, Locator};

use crate::dispatch::MembershipListener;
use crate::membership::{Membership, MembershipError};
use crate::transport::{ConnectionProbe, Transport};

// ── Transport ─────────────────────────────────────────────────────────────────

/// Transport that advertises a fixed endpoint list and records what it sends.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    endpoints: RwLock<Vec<EndpointMetadata>>,
    sent: Mutex<Vec<Detection>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new(endpoints: Vec<EndpointMetadata>) -> Self {
        Self {
            endpoints: RwLock::new(endpoints),
            ..Self::default()
        }
    }

    pub fn set_endpoints(&self, endpoints: Vec<EndpointMetadata>) {
        *self.endpoints.write().unwrap_or_else(|e| e.into_inner()) = endpoints;
    }

    /// Make every following broadcast fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Detection> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Transport for RecordingTransport {
    fn local_endpoints(&self) -> Vec<EndpointMetadata> {
        self.endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn broadcast(&self, detection: &Detection) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("network unreachable");
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(detection.clone());
        Ok(())
    }
}

// ── Probe ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Down,
    Error,
    Panic,
}

/// Probe whose answers are set by the test. Locators are up unless marked.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    down: RwLock<Vec<(Locator, Verdict)>>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark(&self, locator: &Locator, verdict: Verdict) {
        let mut down = self.down.write().unwrap_or_else(|e| e.into_inner());
        down.retain(|(l, _)| l != locator);
        down.push((locator.clone(), verdict));
    }

    /// The probe answers `Ok(false)` for this locator.
    pub fn set_down(&self, locator: &Locator) {
        self.mark(locator, Verdict::Down);
    }

    /// The probe returns an error for this locator.
    pub fn set_failing(&self, locator: &Locator) {
        self.mark(locator, Verdict::Error);
    }

    /// The probe panics for this locator.
    pub fn set_panicking(&self, locator: &Locator) {
        self.mark(locator, Verdict::Panic);
    }

    pub fn set_up(&self, locator: &Locator) {
        self.down
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(l, _)| l != locator);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ConnectionProbe for ScriptedProbe {
    fn probe(&self, locator: &Locator, _timeout: Duration) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let verdict = self
            .down
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(l, _)| l == locator)
            .map(|(_, v)| *v);
        match verdict {
            None => Ok(true),
            Some(Verdict::Down) => Ok(false),
            Some(Verdict::Error) => bail!("connection refused: {locator}"),
            Some(Verdict::Panic) => panic!("probe blew up on {locator}"),
        }
    }
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// Listener that records every event it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<ChangeEvent>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn kinds(&self) -> Vec<ChangeKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Wait until at least `n` events arrived. Returns false on timeout.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.events().len() >= n {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl MembershipListener for RecordingListener {
    fn on_change(&self, event: &ChangeEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

// ── Membership ────────────────────────────────────────────────────────────────

/// Membership sink that rejects every call, as an unreachable remote would.
#[derive(Debug, Default)]
pub struct UnreachableMembership {
    calls: AtomicUsize,
}

impl UnreachableMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail(&self) -> Result<(), MembershipError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(MembershipError::Unreachable("connection reset".to_string()))
    }
}

impl Membership for UnreachableMembership {
    fn add(&self, _: &Identity, _: &[EndpointMetadata]) -> Result<(), MembershipError> {
        self.fail()
    }

    fn update(&self, _: &Identity, _: &[EndpointMetadata]) -> Result<(), MembershipError> {
        self.fail()
    }

    fn remove(&self, _: &Identity) -> Result<(), MembershipError> {
        self.fail()
    }

    fn change_domain(&self, _: &str) -> Result<(), MembershipError> {
        self.fail()
    }
}
