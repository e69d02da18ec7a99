//! Failure detector.
//!
//! Two periodic tasks per detector: the heartbeat task announces this
//! process's endpoints through the transport, and the sweep task re-verifies
//! peers whose heartbeats went quiet. Inbound heartbeats arrive through
//! `detect()` on whatever thread the transport delivers them from.
//!
//! Lock order is peer table, then the publish lock. Registry pushes happen
//! after the table lock is released but while the publish lock is held, so
//! pushes for one peer reach the registry in the order the table saw them.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use pulse_core::{ChangeDetection, ConfigError, Detection, DetectorConfig, Identity, Locator};

use crate::clock::{Clock, SystemClock};
use crate::membership::{Membership, MembershipError};
use crate::peer::{self, PeerRecord, PeerTable, Reconcile};
use crate::transport::{ConnectionProbe, Transport};

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("no tokio runtime available to schedule detector tasks")]
    NoRuntime,
}

// ── Builder ───────────────────────────────────────────────────────────────────

pub struct DetectorBuilder {
    identity: Identity,
    config: DetectorConfig,
    transport: Arc<dyn Transport>,
    probe: Arc<dyn ConnectionProbe>,
    membership: Option<Arc<dyn Membership>>,
    clock: Arc<dyn Clock>,
}

impl DetectorBuilder {
    pub fn config(mut self, config: DetectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Where membership changes are pushed. Without one the detector only
    /// sends heartbeats.
    pub fn membership(mut self, membership: Arc<dyn Membership>) -> Self {
        self.membership = Some(membership);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Detector {
        Detector {
            shared: Arc::new(Shared {
                identity: RwLock::new(self.identity),
                config: RwLock::new(self.config),
                transport: self.transport,
                probe: self.probe,
                membership: self.membership,
                clock: self.clock,
                peers: PeerTable::new(),
                publish: Mutex::new(()),
            }),
            runtime: Handle::try_current().ok(),
            running: Mutex::new(None),
        }
    }
}

// ── Detector ──────────────────────────────────────────────────────────────────

/// Counts from one stale-peer sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Peers found stale and probed.
    pub stale: usize,
    /// Every locator answered; `last_seen` was reset.
    pub refreshed: usize,
    /// Some locators answered; the peer now advertises only those.
    pub narrowed: usize,
    /// No locator answered; the peer was dropped.
    pub removed: usize,
}

struct Running {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Running {
    fn is_alive(&self) -> bool {
        self.tasks.iter().all(|t| !t.is_finished())
    }
}

pub struct Detector {
    shared: Arc<Shared>,
    /// Runtime seen at build time, used when `start()` runs outside one.
    runtime: Option<Handle>,
    running: Mutex<Option<Running>>,
}

impl Detector {
    pub fn builder(
        identity: Identity,
        transport: Arc<dyn Transport>,
        probe: Arc<dyn ConnectionProbe>,
    ) -> DetectorBuilder {
        DetectorBuilder {
            identity,
            config: DetectorConfig::default(),
            transport,
            probe,
            membership: None,
            clock: Arc::new(SystemClock),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the heartbeat and sweep tasks.
    ///
    /// Calling it on a running detector does nothing. Tasks that died are
    /// replaced. Interval changes made while running take effect here.
    pub fn start(&self) -> Result<(), DetectorError> {
        let mut running = self.running();
        if running.as_ref().is_some_and(Running::is_alive) {
            return Ok(());
        }
        if let Some(dead) = running.take() {
            tracing::warn!(peer = %self.shared.identity(), "detector tasks exited; rescheduling");
            let _ = dead.shutdown.send(());
        }

        let handle = self.scheduler()?;

        let identity = self.shared.identity();
        let heartbeat_interval = {
            let mut config = self.shared.config_mut();
            if config.domains().is_empty() {
                if let Some(domain) = identity.domain() {
                    config.set_domains([domain]);
                }
            }
            config.heartbeat_interval()
        };
        // Stale peers are looked for once per heartbeat period.
        let sweep_period = heartbeat_interval;

        if self.shared.membership.is_none() {
            tracing::warn!(
                peer = %identity,
                "no membership registry; running broadcast-only, peers will not be tracked"
            );
        }

        let (shutdown, _) = broadcast::channel(1);
        let tasks = vec![
            handle.spawn(heartbeat_loop(
                self.shared.clone(),
                heartbeat_interval,
                shutdown.subscribe(),
            )),
            handle.spawn(sweep_loop(
                self.shared.clone(),
                sweep_period,
                shutdown.subscribe(),
            )),
        ];

        tracing::info!(
            peer = %identity,
            heartbeat_ms = heartbeat_interval.as_millis() as u64,
            "detector started"
        );
        *running = Some(Running { shutdown, tasks });
        Ok(())
    }

    /// Current runtime, or the one captured at build if called from a plain thread.
    fn scheduler(&self) -> Result<Handle, DetectorError> {
        Handle::try_current()
            .ok()
            .or_else(|| self.runtime.clone())
            .ok_or(DetectorError::NoRuntime)
    }

    /// Stop both periodic tasks. Notifications already queued still go out.
    pub fn stop(&self) {
        let Some(running) = self.running().take() else {
            return;
        };
        let _ = running.shutdown.send(());
        tracing::info!(peer = %self.shared.identity(), "detector stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running().as_ref().is_some_and(Running::is_alive)
    }

    /// Announce this process once. Returns false if nothing was sent.
    pub fn heartbeat(&self) -> bool {
        self.shared.heartbeat()
    }

    /// Fold one inbound heartbeat into the peer table.
    pub fn detect(&self, detection: Detection) {
        self.shared.detect(detection);
    }

    /// Re-verify every stale peer once.
    ///
    /// Blocks for as long as the probes take. The sweep task runs this on the
    /// blocking pool.
    pub fn sweep(&self) -> SweepReport {
        self.shared.sweep()
    }

    /// This process's identity as currently announced.
    pub fn identity(&self) -> Identity {
        self.shared.identity()
    }

    /// Move this process into `domain`.
    ///
    /// Later heartbeats carry the new domain and only peers in it are
    /// accepted. Tracked peers outside it are forgotten, so they are added
    /// again if they come back. The membership registry is moved along.
    /// Returns the number of peers evicted.
    pub fn change_domain(&self, domain: &str) -> usize {
        self.shared.change_domain(domain)
    }

    pub fn config(&self) -> DetectorConfig {
        self.shared.config().clone()
    }

    pub fn tracked_peers(&self) -> Vec<Identity> {
        self.shared
            .peers
            .lock()
            .keys()
            .cloned()
            .collect()
    }

    pub fn peer(&self, identity: &Identity) -> Option<PeerRecord> {
        self.shared.peers.get(identity)
    }

    pub fn set_heartbeat_interval(&self, interval: Duration) -> Result<(), ConfigError> {
        self.shared.config_mut().set_heartbeat_interval(interval)
    }

    pub fn set_stale_after(&self, stale_after: Duration) -> Result<(), ConfigError> {
        self.shared.config_mut().set_stale_after(stale_after)
    }

    pub fn set_probe_timeout(&self, timeout: Duration) -> Result<(), ConfigError> {
        self.shared.config_mut().set_probe_timeout(timeout)
    }

    pub fn set_domains<I, S>(&self, domains: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared.config_mut().set_domains(domains);
    }

    pub fn set_accept_local(&self, accept_local: bool) {
        self.shared.config_mut().set_accept_local(accept_local);
    }

    pub fn set_change_detection(&self, mode: ChangeDetection) {
        self.shared.config_mut().set_change_detection(mode);
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Periodic tasks ────────────────────────────────────────────────────────────

async fn heartbeat_loop(
    shared: Arc<Shared>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                shared.heartbeat();
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!(peer = %shared.identity(), "heartbeat task exiting");
}

async fn sweep_loop(shared: Arc<Shared>, period: Duration, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.recv() => break,
        }

        let worker = shared.clone();
        let sweep = tokio::task::spawn_blocking(move || worker.sweep());
        // An abandoned sweep runs to completion on the blocking pool.
        tokio::select! {
            joined = sweep => match joined {
                Ok(report) if report.stale > 0 => {
                    tracing::debug!(
                        stale = report.stale,
                        refreshed = report.refreshed,
                        narrowed = report.narrowed,
                        removed = report.removed,
                        "sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "sweep task failed"),
            },
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!(peer = %shared.identity(), "sweep task exiting");
}

// ── Shared state ──────────────────────────────────────────────────────────────

struct Shared {
    identity: RwLock<Identity>,
    config: RwLock<DetectorConfig>,
    transport: Arc<dyn Transport>,
    probe: Arc<dyn ConnectionProbe>,
    membership: Option<Arc<dyn Membership>>,
    clock: Arc<dyn Clock>,
    peers: PeerTable,
    publish: Mutex<()>,
}

impl Shared {
    fn config(&self) -> RwLockReadGuard<'_, DetectorConfig> {
        self.config.read().unwrap_or_else(|e| e.into_inner())
    }

    fn config_mut(&self) -> RwLockWriteGuard<'_, DetectorConfig> {
        self.config.write().unwrap_or_else(|e| e.into_inner())
    }

    fn identity(&self) -> Identity {
        self.identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// One heartbeat. A panicking transport costs this period only.
    fn heartbeat(&self) -> bool {
        match catch_unwind(AssertUnwindSafe(|| self.send_heartbeat())) {
            Ok(sent) => sent,
            Err(_) => {
                tracing::warn!("heartbeat panicked; retrying next period");
                false
            }
        }
    }

    fn send_heartbeat(&self) -> bool {
        let endpoints = self.transport.local_endpoints();
        if endpoints.is_empty() {
            tracing::trace!("no started endpoints; heartbeat skipped");
            return false;
        }
        let detection = Detection::new(self.identity(), endpoints);
        match self.transport.broadcast(&detection) {
            Ok(()) => {
                tracing::trace!(endpoints = detection.endpoints().len(), "heartbeat sent");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "heartbeat send failed");
                false
            }
        }
    }

    fn is_acceptable(&self, identity: &Identity) -> bool {
        let config = self.config();
        let in_domain = match identity.domain() {
            None => true,
            Some(domain) => config.domains().is_empty() || config.domains().contains(domain),
        };
        in_domain && (config.accept_local() || !self.identity().is_same_process(identity))
    }

    fn change_domain(&self, domain: &str) -> usize {
        let mut records = self.peers.lock();
        {
            let mut identity = self.identity.write().unwrap_or_else(|e| e.into_inner());
            let moved = identity.with_domain(domain);
            *identity = moved;
        }
        self.config_mut().set_domains([domain]);
        let before = records.len();
        records.retain(|id, _| id.domain() == Some(domain));
        let evicted = before - records.len();

        let _publish = self.publish_lock();
        drop(records);
        tracing::info!(domain, evicted, "detector domain changed");
        if let Some(membership) = self.membership.as_deref() {
            log_push(&self.identity(), membership.change_domain(domain));
        }
        evicted
    }

    fn detect(&self, detection: Detection) {
        if !self.is_acceptable(detection.identity()) {
            tracing::trace!(peer = %detection.identity(), "heartbeat filtered");
            return;
        }
        let Some(membership) = self.membership.as_deref() else {
            tracing::trace!(peer = %detection.identity(), "no membership registry; heartbeat dropped");
            return;
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| self.reconcile(membership, &detection)));
        if outcome.is_err() {
            tracing::warn!(peer = %detection.identity(), "heartbeat processing panicked; dropped");
        }
    }

    fn reconcile(&self, membership: &dyn Membership, detection: &Detection) {
        let mode = self.config().change_detection();
        let identity = detection.identity();
        let endpoints = detection.endpoints();

        let mut records = self.peers.lock();
        // The domain may have moved since the unlocked check in `detect`.
        if !self.is_acceptable(identity) {
            return;
        }
        let outcome = peer::reconcile(&mut records, detection, self.clock.now(), mode);
        if outcome == Reconcile::Refreshed {
            return;
        }
        let _publish = self.publish_lock();
        drop(records);

        tracing::debug!(peer = %identity, outcome = ?outcome, endpoints = endpoints.len(), "peer reconciled");
        let pushed = match outcome {
            Reconcile::Added => membership.add(identity, endpoints),
            Reconcile::Updated => membership.update(identity, endpoints),
            Reconcile::Refreshed => Ok(()),
        };
        log_push(identity, pushed);
    }

    fn publish_lock(&self) -> MutexGuard<'_, ()> {
        self.publish.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sweep(&self) -> SweepReport {
        let (stale_after, timeout) = {
            let config = self.config();
            (config.stale_after(), config.probe_timeout())
        };
        let now = self.clock.now();
        let stale: Vec<PeerRecord> = self
            .peers
            .snapshot()
            .into_iter()
            .filter(|record| record.is_stale(now, stale_after))
            .collect();

        let mut report = SweepReport {
            stale: stale.len(),
            ..SweepReport::default()
        };
        for record in stale {
            let peer = record.detection.identity().clone();
            let verified = catch_unwind(AssertUnwindSafe(|| self.verify(record, timeout, &mut report)));
            if verified.is_err() {
                tracing::warn!(peer = %peer, "stale peer verification panicked");
            }
        }
        report
    }

    fn probe(&self, locator: &Locator, timeout: Duration) -> bool {
        match catch_unwind(AssertUnwindSafe(|| self.probe.probe(locator, timeout))) {
            Ok(Ok(up)) => up,
            Ok(Err(e)) => {
                tracing::debug!(%locator, error = %e, "probe failed");
                false
            }
            Err(_) => {
                tracing::warn!(%locator, "probe panicked; counting locator as down");
                false
            }
        }
    }

    /// Probe one stale peer with no lock held, then apply the verdict.
    fn verify(&self, stale: PeerRecord, timeout: Duration, report: &mut SweepReport) {
        let locators = stale.detection.locators();
        let alive: Vec<&Locator> = locators
            .iter()
            .filter(|locator| self.probe(locator, timeout))
            .collect();

        let identity = stale.detection.identity();
        let now = self.clock.now();
        let mut records = self.peers.lock();

        // A heartbeat arrived while probing; it is newer than the verdict.
        let unchanged = records.get(identity).is_some_and(|current| {
            current.last_seen == stale.last_seen && current.detection.same_endpoints(&stale.detection)
        });
        if !unchanged {
            tracing::debug!(peer = %identity, "peer changed during probe; verdict discarded");
            return;
        }

        if alive.is_empty() {
            records.remove(identity);
            report.removed += 1;
            let _publish = self.publish_lock();
            drop(records);
            tracing::info!(peer = %identity, locators = locators.len(), "peer unreachable; removed");
            if let Some(membership) = self.membership.as_deref() {
                log_push(identity, membership.remove(identity));
            }
        } else if alive.len() == locators.len() {
            if let Some(record) = records.get_mut(identity) {
                record.last_seen = now;
            }
            report.refreshed += 1;
            tracing::debug!(peer = %identity, "stale peer answered probes");
        } else {
            let narrowed = stale.detection.retain_locators(|l| alive.contains(&l));
            records.insert(identity.clone(), PeerRecord::new(narrowed.clone(), now));
            report.narrowed += 1;
            let _publish = self.publish_lock();
            drop(records);
            tracing::info!(
                peer = %identity,
                reachable = alive.len(),
                advertised = locators.len(),
                "peer partially reachable; endpoints narrowed"
            );
            if let Some(membership) = self.membership.as_deref() {
                log_push(identity, membership.update(identity, narrowed.endpoints()));
            }
        }
    }
}

fn log_push(identity: &Identity, pushed: Result<(), MembershipError>) {
    if let Err(e) = pushed {
        tracing::warn!(peer = %identity, error = %e, "membership push failed; local state kept");
    }
}
