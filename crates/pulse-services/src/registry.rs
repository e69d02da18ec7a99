//! Membership registry: the process-wide table of known peers.
//!
//! Mutated only through add/update/remove/change_domain, all serialized by
//! one lock. Reads hand out copies. Every state change is queued to the
//! subscribers before the lock is released, which keeps per-identity event
//! order equal to mutation order; delivery itself happens on the
//! subscribers' own tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use pulse_core::{ChangeEvent, ChangeKind, EndpointMetadata, Identity, Locator, MembershipEntry};

use crate::dispatch::{MembershipListener, SubscriptionId, Subscribers};
use crate::membership::{Membership, MembershipError};

struct RegistryState {
    local: Identity,
    entries: HashMap<Identity, MembershipEntry>,
}

pub struct MembershipRegistry {
    state: Mutex<RegistryState>,
    subscribers: Subscribers,
}

impl MembershipRegistry {
    /// Create a registry owned by the process identified by `local`.
    pub fn new(local: Identity) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                local,
                entries: HashMap::new(),
            }),
            subscribers: Subscribers::new(),
        }
    }

    pub fn shared(local: Identity) -> Arc<Self> {
        Arc::new(Self::new(local))
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn local_identity(&self) -> Identity {
        self.lock().local.clone()
    }

    /// Insert a new member. Returns false (and notifies nobody) if present.
    pub fn add(&self, identity: &Identity, endpoints: &[EndpointMetadata]) -> bool {
        let mut state = self.lock();
        if state.entries.contains_key(identity) {
            return false;
        }
        let entry = MembershipEntry::new(identity.clone(), endpoints.to_vec());
        state.entries.insert(identity.clone(), entry);
        tracing::info!(peer = %identity, endpoints = endpoints.len(), "member added");
        self.subscribers.publish(ChangeEvent::new(
            ChangeKind::Added,
            identity.clone(),
            endpoints.to_vec(),
        ));
        true
    }

    /// Replace a member's endpoints. Returns false if the member is unknown.
    pub fn update(&self, identity: &Identity, endpoints: &[EndpointMetadata]) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(identity) else {
            return false;
        };
        *entry = MembershipEntry::new(identity.clone(), endpoints.to_vec());
        tracing::debug!(peer = %identity, endpoints = endpoints.len(), "member updated");
        self.subscribers.publish(ChangeEvent::new(
            ChangeKind::Updated,
            identity.clone(),
            endpoints.to_vec(),
        ));
        true
    }

    /// Forget a member. The Removed event carries its former endpoints.
    pub fn remove(&self, identity: &Identity) -> bool {
        let mut state = self.lock();
        let Some(former) = state.entries.remove(identity) else {
            return false;
        };
        tracing::info!(peer = %identity, "member removed");
        self.subscribers.publish(ChangeEvent::new(
            ChangeKind::Removed,
            former.identity,
            former.endpoints,
        ));
        true
    }

    pub fn has(&self, identity: &Identity) -> bool {
        self.lock().entries.contains_key(identity)
    }

    pub fn get(&self, identity: &Identity) -> Option<MembershipEntry> {
        self.lock().entries.get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every member.
    pub fn all(&self) -> Vec<MembershipEntry> {
        self.query(None)
    }

    /// Snapshot of the members accepted by `filter`. `None` matches all.
    pub fn query(
        &self,
        filter: Option<&dyn Fn(&Identity, &[Locator]) -> bool>,
    ) -> Vec<MembershipEntry> {
        let state = self.lock();
        state
            .entries
            .values()
            .filter(|entry| match filter {
                Some(f) => f(&entry.identity, &entry.locators()),
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Members with at least one endpoint serving `subsystem`.
    pub fn query_subsystem(&self, subsystem: &str) -> Vec<MembershipEntry> {
        let state = self.lock();
        state
            .entries
            .values()
            .filter(|entry| entry.supports(subsystem))
            .cloned()
            .collect()
    }

    /// Move the local process into `domain` and evict every member outside it.
    ///
    /// Emits a single DomainChanged event; evicted members get no Removed.
    pub fn change_domain(&self, domain: &str) {
        let mut state = self.lock();
        state.local = state.local.with_domain(domain);
        let before = state.entries.len();
        state
            .entries
            .retain(|identity, _| identity.domain() == Some(domain));
        tracing::info!(
            domain,
            evicted = before - state.entries.len(),
            "membership domain changed"
        );
        self.subscribers.publish(ChangeEvent::new(
            ChangeKind::DomainChanged,
            state.local.clone(),
            Vec::new(),
        ));
    }

    /// Register a listener for every future change.
    pub fn subscribe(&self, listener: impl MembershipListener) -> SubscriptionId {
        self.subscribe_shared(Arc::new(listener))
    }

    pub fn subscribe_shared(&self, listener: Arc<dyn MembershipListener>) -> SubscriptionId {
        self.subscribers.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Membership for MembershipRegistry {
    fn add(
        &self,
        identity: &Identity,
        endpoints: &[EndpointMetadata],
    ) -> Result<(), MembershipError> {
        MembershipRegistry::add(self, identity, endpoints);
        Ok(())
    }

    fn update(
        &self,
        identity: &Identity,
        endpoints: &[EndpointMetadata],
    ) -> Result<(), MembershipError> {
        MembershipRegistry::update(self, identity, endpoints);
        Ok(())
    }

    fn remove(&self, identity: &Identity) -> Result<(), MembershipError> {
        MembershipRegistry::remove(self, identity);
        Ok(())
    }

    fn change_domain(&self, domain: &str) -> Result<(), MembershipError> {
        MembershipRegistry::change_domain(self, domain);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingListener;
    use std::time::Duration;

    fn ident(domain: &str, name: &str) -> Identity {
        Identity::new(Some(domain), name, format!("proc-{name}"))
    }

    fn endpoint(port: u16, subsystem: &str) -> EndpointMetadata {
        EndpointMetadata::new(Locator::new("socket", "10.0.0.1", port), [subsystem])
    }

    fn registry() -> (MembershipRegistry, RecordingListener) {
        let registry = MembershipRegistry::new(ident("d1", "local"));
        let recorder = RecordingListener::new();
        registry.subscribe(recorder.clone());
        (registry, recorder)
    }

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn add_is_noop_when_present() {
        let (registry, recorder) = registry();
        let a = ident("d1", "a");

        assert!(registry.add(&a, &[endpoint(1, "sub1")]));
        assert!(!registry.add(&a, &[endpoint(2, "sub1")]));

        assert!(recorder.wait_for(1, WAIT).await);
        assert_eq!(recorder.kinds(), vec![ChangeKind::Added]);
        assert_eq!(registry.get(&a).unwrap().endpoints, vec![endpoint(1, "sub1")]);
    }

    #[tokio::test]
    async fn update_and_remove_ignore_unknown_members() {
        let (registry, recorder) = registry();
        let ghost = ident("d1", "ghost");

        assert!(!registry.update(&ghost, &[endpoint(1, "x")]));
        assert!(!registry.remove(&ghost));
        assert!(!registry.has(&ghost));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(recorder.events().is_empty());
    }

    #[tokio::test]
    async fn remove_carries_former_endpoints() {
        let (registry, recorder) = registry();
        let a = ident("d1", "a");

        registry.add(&a, &[endpoint(1, "sub1")]);
        registry.update(&a, &[endpoint(2, "sub1")]);
        assert!(registry.remove(&a));

        assert!(recorder.wait_for(3, WAIT).await);
        let events = recorder.events();
        assert_eq!(
            recorder.kinds(),
            vec![ChangeKind::Added, ChangeKind::Updated, ChangeKind::Removed]
        );
        assert_eq!(events[2].endpoints, vec![endpoint(2, "sub1")]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn reads_are_copies() {
        let (registry, _recorder) = registry();
        let a = ident("d1", "a");
        registry.add(&a, &[endpoint(1, "sub1")]);

        let mut snapshot = registry.all();
        snapshot[0].endpoints.clear();

        assert_eq!(registry.all()[0].endpoints.len(), 1);
    }

    #[tokio::test]
    async fn query_filters_by_predicate() {
        let (registry, _recorder) = registry();
        registry.add(&ident("d1", "a"), &[endpoint(1, "sub1")]);
        registry.add(&ident("d1", "b"), &[endpoint(2, "sub2")]);

        assert_eq!(registry.query(None).len(), 2);

        let only_port_2 = |_: &Identity, locators: &[Locator]| locators.iter().any(|l| l.port() == 2);
        let hits = registry.query(Some(&only_port_2));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].identity.instance_id(), "b");

        let hits = registry.query_subsystem("SUB1");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].identity.instance_id(), "a");
    }

    #[tokio::test]
    async fn change_domain_evicts_and_fires_once() {
        let (registry, recorder) = registry();
        registry.add(&ident("d1", "a"), &[endpoint(1, "x")]);
        registry.add(&ident("d2", "b"), &[endpoint(2, "x")]);
        registry.add(&ident("d2", "c"), &[endpoint(3, "x")]);
        assert!(recorder.wait_for(3, WAIT).await);
        recorder.clear();

        registry.change_domain("d2");

        let remaining = registry.all();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|e| e.identity.domain() == Some("d2")));
        assert_eq!(registry.local_identity().domain(), Some("d2"));

        assert!(recorder.wait_for(1, WAIT).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(recorder.kinds(), vec![ChangeKind::DomainChanged]);
        assert_eq!(recorder.events()[0].identity.domain(), Some("d2"));
    }

    #[tokio::test]
    async fn trait_surface_mutates_registry() {
        let registry = MembershipRegistry::shared(ident("d1", "local"));
        let membership: Arc<dyn Membership> = registry.clone();
        let a = ident("d1", "a");

        membership.add(&a, &[endpoint(1, "x")]).unwrap();
        membership.update(&a, &[endpoint(2, "x")]).unwrap();
        assert_eq!(registry.get(&a).unwrap().locators()[0].port(), 2);

        membership.remove(&a).unwrap();
        assert!(!registry.has(&a));

        membership.change_domain("d2").unwrap();
        assert_eq!(registry.local_identity().domain(), Some("d2"));
    }
}
