pub mod api;
pub mod arbiter;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod links;
pub mod loader;
pub mod part;
pub mod payload;
pub mod problems;
pub mod realm;
pub mod satellite;
pub mod util;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{fingerprint::Fingerprint, part::PartId, payload::DaemonPayload};

/// Answer to `GET /ping`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    /// Session token, regenerated every time the daemon process starts.
    pub running_id: String,
}

/// Answer to `GET /managed_configurations`.
///
/// `hash` is the fingerprint of the whole payload the daemon currently runs,
/// `managed` maps every configuration part it works on to that part's push flavor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedConfigurations {
    pub hash: Option<Fingerprint>,
    #[serde(default)]
    pub managed: BTreeMap<PartId, Fingerprint>,
}

impl ManagedConfigurations {
    pub fn is_empty(&self) -> bool {
        self.hash.is_none() && self.managed.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub hash: Fingerprint,
    pub payload: DaemonPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub accepted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRequest {
    pub stop_now: bool,
}

/// Event a daemon buffered for the arbiter (returned by `GET /events`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub message: String,
}

impl DaemonEvent {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: kind.into(),
            message: message.into(),
        }
    }
}
