//! Change-notification fan-out.
//!
//! Every subscriber owns an unbounded queue drained by its own task, so a
//! slow or panicking listener never holds up the registry or the other
//! listeners. Events are enqueued in mutation order and each queue is
//! drained in order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use pulse_core::ChangeEvent;

/// Receives membership change notifications.
///
/// Called from a delivery task, never while the registry lock is held.
pub trait MembershipListener: Send + Sync + 'static {
    fn on_change(&self, event: &ChangeEvent);
}

impl<F> MembershipListener for F
where
    F: Fn(&ChangeEvent) + Send + Sync + 'static,
{
    fn on_change(&self, event: &ChangeEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Queue = mpsc::UnboundedSender<Arc<ChangeEvent>>;

pub(crate) struct Subscribers {
    queues: DashMap<SubscriptionId, Queue>,
    next_id: AtomicU64,
}

impl Subscribers {
    pub(crate) fn new() -> Self {
        Self {
            queues: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn subscribe(&self, listener: Arc<dyn MembershipListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        spawn_delivery(id, listener, rx);
        self.queues.insert(id, tx);
        id
    }

    /// Already-queued events are still delivered; nothing new is.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.queues.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.queues.len()
    }

    pub(crate) fn publish(&self, event: ChangeEvent) {
        let event = Arc::new(event);
        let mut closed = Vec::new();
        for queue in self.queues.iter() {
            if queue.value().send(event.clone()).is_err() {
                closed.push(*queue.key());
            }
        }
        for id in closed {
            tracing::debug!(subscription = id.0, "dropping subscriber with closed queue");
            self.queues.remove(&id);
        }
    }
}

fn spawn_delivery(
    id: SubscriptionId,
    listener: Arc<dyn MembershipListener>,
    mut rx: mpsc::UnboundedReceiver<Arc<ChangeEvent>>,
) {
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                while let Some(event) = rx.recv().await {
                    deliver(id, listener.as_ref(), &event);
                }
            });
        }
        // Subscribed from outside any runtime: drain on a plain thread.
        Err(_) => {
            let spawned = std::thread::Builder::new()
                .name(format!("pulse-listener-{}", id.0))
                .spawn(move || {
                    while let Some(event) = rx.blocking_recv() {
                        deliver(id, listener.as_ref(), &event);
                    }
                });
            if let Err(e) = spawned {
                tracing::warn!(subscription = id.0, error = %e, "failed to start listener thread");
            }
        }
    }
}

fn deliver(id: SubscriptionId, listener: &dyn MembershipListener, event: &ChangeEvent) {
    let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_change(event)));
    if outcome.is_err() {
        tracing::warn!(
            subscription = id.0,
            kind = ?event.kind,
            peer = %event.identity,
            "membership listener panicked"
        );
    }
}
