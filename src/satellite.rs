//! Receiving side of the dispatch protocol
//!
//! [`SatelliteState`] is what a daemon keeps between two arbiter calls: the
//! payload it runs, the events it has not reported yet and whether it was told
//! to stay passive. The `fleet-satellite` binary serves it over HTTP.

use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    DaemonEvent, ManagedConfigurations, PingResponse, PushRequest, PushResponse,
    fingerprint::Fingerprint, links::DaemonType, payload::DaemonPayload,
};

#[derive(Debug, Default)]
struct Running {
    hash: Option<Fingerprint>,
    payload: Option<DaemonPayload>,
    events: Vec<DaemonEvent>,
    passive: bool,
}

#[derive(Debug)]
pub struct SatelliteState {
    daemon_type: DaemonType,
    running_id: String,
    running: Mutex<Running>,
}

impl SatelliteState {
    pub fn new(daemon_type: DaemonType) -> Self {
        Self {
            daemon_type,
            running_id: Uuid::new_v4().to_string(),
            running: Mutex::default(),
        }
    }

    pub fn daemon_type(&self) -> DaemonType {
        self.daemon_type
    }

    fn lock(&self) -> MutexGuard<'_, Running> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn ping(&self) -> PingResponse {
        PingResponse {
            running_id: self.running_id.clone(),
        }
    }

    pub fn managed_configurations(&self) -> ManagedConfigurations {
        let running = self.lock();
        ManagedConfigurations {
            hash: running.hash.clone(),
            managed: running
                .payload
                .as_ref()
                .map(DaemonPayload::managed_parts)
                .unwrap_or_default(),
        }
    }

    /// Take a pushed payload.
    ///
    /// The payload must be meant for this type of daemon and hash to what the
    /// arbiter announced. A payload already running is accepted without change.
    pub fn push(&self, request: PushRequest) -> PushResponse {
        let PushRequest { hash, payload } = request;
        let mut running = self.lock();

        if running.hash.as_ref() == Some(&hash) {
            debug!("configuration {} already running", hash.short());
            return PushResponse { accepted: true };
        }

        let intended = payload.identity().daemon_type;
        if intended != self.daemon_type {
            warn!("refusing a {intended} configuration, this is a {}", self.daemon_type);
            return PushResponse { accepted: false };
        }

        match payload.fingerprint() {
            Ok(fingerprint) if fingerprint == hash => {}
            Ok(fingerprint) => {
                warn!(
                    "configuration hash mismatch: announced {}, computed {}",
                    hash.short(),
                    fingerprint.short()
                );
                return PushResponse { accepted: false };
            }
            Err(e) => {
                warn!("failed to fingerprint configuration: {e}");
                return PushResponse { accepted: false };
            }
        }

        let parts = payload.managed_parts().len();
        info!("running configuration {} ({parts} part(s))", hash.short());
        running.events.push(DaemonEvent::new(
            "configuration",
            format!("received configuration {} for {parts} part(s)", hash.short()),
        ));
        running.hash = Some(hash);
        running.payload = Some(payload);
        running.passive = false;

        PushResponse { accepted: true }
    }

    /// Drop the running payload
    pub fn wait_new_conf(&self) {
        let mut running = self.lock();
        info!("dropping configuration, waiting for a new one");
        running.hash = None;
        running.payload = None;
    }

    /// Stay passive while the master arbiter lives. Only arbiters accept this.
    pub fn do_not_run(&self) -> bool {
        if self.daemon_type != DaemonType::Arbiter {
            return false;
        }
        let mut running = self.lock();
        if !running.passive {
            info!("master arbiter is alive, staying passive");
            running.passive = true;
        }
        true
    }

    pub fn is_passive(&self) -> bool {
        self.lock().passive
    }

    pub fn drain_events(&self) -> Vec<DaemonEvent> {
        std::mem::take(&mut self.lock().events)
    }
}
