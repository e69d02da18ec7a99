//! Peer table: the detector's private liveness view.
//!
//! One coarse lock guards the whole map. `detect()` reconciles under it;
//! the sweep snapshots under it, drops it for probing, and re-takes it only
//! to apply the outcome.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use pulse_core::{ChangeDetection, Detection, Identity};

/// What the detector knows about one peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub detection: Detection,
    pub last_seen: Instant,
    pub fingerprint: u64,
}

impl PeerRecord {
    pub fn new(detection: Detection, now: Instant) -> Self {
        let fingerprint = detection.fingerprint();
        Self {
            detection,
            last_seen: now,
            fingerprint,
        }
    }

    /// `now - last_seen >= stale_after`. A clock behind `last_seen` is never stale.
    pub fn is_stale(&self, now: Instant, stale_after: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) >= stale_after
    }
}

pub(crate) type Records = HashMap<Identity, PeerRecord>;

#[derive(Debug, Default)]
pub struct PeerTable {
    records: Mutex<Records>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, identity: &Identity) -> Option<PeerRecord> {
        self.lock().get(identity).cloned()
    }

    /// Copy of every record, taken under the lock.
    pub fn snapshot(&self) -> Vec<PeerRecord> {
        self.lock().values().cloned().collect()
    }
}

/// Outcome of folding one heartbeat into the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    /// First heartbeat for this identity.
    Added,
    /// Known identity, advertised endpoints changed. The record was replaced.
    Updated,
    /// Known identity, nothing changed. Only `last_seen` moved.
    Refreshed,
}

/// Insert, replace or refresh the record for `detection`.
///
/// Caller holds the table lock.
pub(crate) fn reconcile(
    records: &mut Records,
    detection: &Detection,
    now: Instant,
    mode: ChangeDetection,
) -> Reconcile {
    let Some(record) = records.get_mut(detection.identity()) else {
        records.insert(
            detection.identity().clone(),
            PeerRecord::new(detection.clone(), now),
        );
        return Reconcile::Added;
    };

    let changed = match mode {
        ChangeDetection::Fingerprint => record.fingerprint != detection.fingerprint(),
        ChangeDetection::Exact => !record.detection.same_endpoints(detection),
    };

    if changed {
        *record = PeerRecord::new(detection.clone(), now);
        Reconcile::Updated
    } else {
        record.last_seen = now;
        Reconcile::Refreshed
    }
}
