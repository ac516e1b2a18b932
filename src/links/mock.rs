//! In-memory fleet for tests
//!
//! [`MockTransport`] answers every RPC from a table of simulated daemons keyed
//! by type and name. A daemon is created, reachable and empty, the first time
//! it is addressed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    DaemonEvent, ManagedConfigurations, PingResponse, PushRequest, PushResponse,
    error::LinkError, fingerprint::Fingerprint, part::PartId, payload::DaemonPayload,
};

use super::{DaemonType, LinkTarget, Transport};

#[derive(Debug, Clone)]
pub struct MockPeer {
    pub reachable: bool,
    pub running_id: String,
    pub hash: Option<Fingerprint>,
    pub managed: BTreeMap<PartId, Fingerprint>,
    pub payload: Option<DaemonPayload>,
    pub reject_pushes: bool,
    /// Keep running after a graceful stop request
    pub ignores_graceful_stop: bool,
    /// Pushes that changed what the daemon runs
    pub applied_pushes: usize,
    /// Every push request received, including no-ops
    pub push_requests: usize,
    pub events: Vec<DaemonEvent>,
    pub stop_requests: Vec<bool>,
    pub wait_new_conf_requests: usize,
    pub do_not_run_requests: usize,
}

impl MockPeer {
    fn new() -> Self {
        Self {
            reachable: true,
            running_id: Uuid::new_v4().to_string(),
            hash: None,
            managed: BTreeMap::new(),
            payload: None,
            reject_pushes: false,
            ignores_graceful_stop: false,
            applied_pushes: 0,
            push_requests: 0,
            events: Vec::new(),
            stop_requests: Vec::new(),
            wait_new_conf_requests: 0,
            do_not_run_requests: 0,
        }
    }

    fn forget_configuration(&mut self) {
        self.hash = None;
        self.managed.clear();
        self.payload = None;
    }
}

type PeerKey = (DaemonType, String);

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    peers: Arc<Mutex<HashMap<PeerKey, MockPeer>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PeerKey, MockPeer>> {
        // a poisoned table only happens after a test already panicked
        self.peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_peer<R>(&self, daemon_type: DaemonType, name: &str, f: impl FnOnce(&mut MockPeer) -> R) -> R {
        let mut peers = self.lock();
        let peer = peers
            .entry((daemon_type, name.to_string()))
            .or_insert_with(MockPeer::new);
        f(peer)
    }

    fn call<R>(
        &self,
        target: &LinkTarget,
        f: impl FnOnce(&mut MockPeer) -> R,
    ) -> Result<R, LinkError> {
        self.with_peer(target.daemon_type, &target.name, |peer| {
            if peer.reachable {
                Ok(f(peer))
            } else {
                Err(LinkError::Unreachable(format!(
                    "connection refused by {}",
                    target.uri
                )))
            }
        })
    }

    pub fn set_reachable(&self, daemon_type: DaemonType, name: &str, reachable: bool) {
        self.with_peer(daemon_type, name, |peer| peer.reachable = reachable);
    }

    /// Simulate a process restart: new session, no configuration, reachable
    pub fn restart(&self, daemon_type: DaemonType, name: &str) {
        self.with_peer(daemon_type, name, |peer| {
            peer.reachable = true;
            peer.running_id = Uuid::new_v4().to_string();
            peer.forget_configuration();
        });
    }

    pub fn reject_pushes(&self, daemon_type: DaemonType, name: &str, reject: bool) {
        self.with_peer(daemon_type, name, |peer| peer.reject_pushes = reject);
    }

    pub fn ignore_graceful_stop(&self, daemon_type: DaemonType, name: &str, ignore: bool) {
        self.with_peer(daemon_type, name, |peer| peer.ignores_graceful_stop = ignore);
    }

    /// Make the daemon report something else than what it was sent
    pub fn set_managed(&self, daemon_type: DaemonType, name: &str, managed: ManagedConfigurations) {
        self.with_peer(daemon_type, name, |peer| {
            peer.hash = managed.hash;
            peer.managed = managed.managed;
        });
    }

    pub fn queue_event(&self, daemon_type: DaemonType, name: &str, event: DaemonEvent) {
        self.with_peer(daemon_type, name, |peer| peer.events.push(event));
    }

    pub fn peer(&self, daemon_type: DaemonType, name: &str) -> Option<MockPeer> {
        self.lock().get(&(daemon_type, name.to_string())).cloned()
    }

    pub fn applied_pushes(&self, daemon_type: DaemonType, name: &str) -> usize {
        self.peer(daemon_type, name)
            .map_or(0, |peer| peer.applied_pushes)
    }

    pub fn total_push_requests(&self) -> usize {
        self.lock().values().map(|peer| peer.push_requests).sum()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn ping(&self, target: &LinkTarget) -> Result<PingResponse, LinkError> {
        self.call(target, |peer| PingResponse {
            running_id: peer.running_id.clone(),
        })
    }

    async fn managed_configurations(
        &self,
        target: &LinkTarget,
    ) -> Result<ManagedConfigurations, LinkError> {
        self.call(target, |peer| ManagedConfigurations {
            hash: peer.hash.clone(),
            managed: peer.managed.clone(),
        })
    }

    async fn push_configuration(
        &self,
        target: &LinkTarget,
        request: &PushRequest,
    ) -> Result<PushResponse, LinkError> {
        self.call(target, |peer| {
            peer.push_requests += 1;
            if peer.reject_pushes {
                return PushResponse { accepted: false };
            }
            if peer.hash.as_ref() != Some(&request.hash) {
                peer.hash = Some(request.hash.clone());
                peer.managed = request.payload.managed_parts();
                peer.payload = Some(request.payload.clone());
                peer.applied_pushes += 1;
            }
            PushResponse { accepted: true }
        })
    }

    async fn wait_new_conf(&self, target: &LinkTarget) -> Result<(), LinkError> {
        self.call(target, |peer| {
            peer.wait_new_conf_requests += 1;
            peer.forget_configuration();
        })
    }

    async fn do_not_run(&self, target: &LinkTarget) -> Result<(), LinkError> {
        self.call(target, |peer| peer.do_not_run_requests += 1)
    }

    async fn get_events(&self, target: &LinkTarget) -> Result<Vec<DaemonEvent>, LinkError> {
        self.call(target, |peer| std::mem::take(&mut peer.events))
    }

    async fn stop_request(&self, target: &LinkTarget, stop_now: bool) -> Result<(), LinkError> {
        self.call(target, |peer| {
            peer.stop_requests.push(stop_now);
            if stop_now || !peer.ignores_graceful_stop {
                peer.reachable = false;
            }
        })
    }
}
