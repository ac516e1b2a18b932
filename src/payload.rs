//! Configuration payloads pushed to daemons
//!
//! One tagged variant per daemon family, each with a fixed field set. Payloads
//! are built by the dispatcher and only turned into bytes at the transport
//! boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::FleetConfig,
    fingerprint::Fingerprint,
    links::DaemonType,
    part::{PartId, SerializedPart},
};

/// Who the payload is for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonIdentity {
    pub name: String,
    pub daemon_type: DaemonType,
    pub uuid: Uuid,
    pub realm: String,
    pub spare: bool,
}

/// Settings shared by every daemon of a configuration generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    pub config_name: String,
    pub arbiter_name: String,
}

/// How a payload refers to another daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonRef {
    pub name: String,
    pub daemon_type: DaemonType,
    pub uri: String,
    pub realm: String,
    pub spare: bool,
}

/// What a satellite needs to know about one scheduler it works for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerPointer {
    pub part_id: PartId,
    pub scheduler: DaemonRef,
    pub push_flavor: Fingerprint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterPayload {
    pub identity: DaemonIdentity,
    pub global: GlobalSettings,
    /// Full configuration snapshot, only shipped to spare arbiters
    pub whole_conf: Option<FleetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerPayload {
    pub identity: DaemonIdentity,
    pub global: GlobalSettings,
    pub part: SerializedPart,
    /// Pollers, reactionners and brokers visible from the scheduler's realm
    pub satellites: Vec<DaemonRef>,
    /// Only filled for schedulers that manage arbiter alerts
    pub arbiters: Vec<DaemonRef>,
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatellitePayload {
    pub identity: DaemonIdentity,
    pub global: GlobalSettings,
    #[serde(with = "pointers_by_part")]
    pub schedulers: BTreeMap<PartId, SchedulerPointer>,
    pub modules: Vec<String>,
}

/// Scheduler pointers travel as a list, each pointer carries its part id.
///
/// A map keyed by part id does not survive the buffering of the tagged
/// [`DaemonPayload`]: the keys come back as strings.
mod pointers_by_part {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::SchedulerPointer;
    use crate::part::PartId;

    pub fn serialize<S: Serializer>(
        pointers: &BTreeMap<PartId, SchedulerPointer>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(pointers.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<PartId, SchedulerPointer>, D::Error> {
        let pointers = Vec::<SchedulerPointer>::deserialize(deserializer)?;
        Ok(pointers
            .into_iter()
            .map(|pointer| (pointer.part_id, pointer))
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DaemonPayload {
    Arbiter(ArbiterPayload),
    Scheduler(SchedulerPayload),
    Satellite(SatellitePayload),
}

impl DaemonPayload {
    pub fn identity(&self) -> &DaemonIdentity {
        match self {
            DaemonPayload::Arbiter(payload) => &payload.identity,
            DaemonPayload::Scheduler(payload) => &payload.identity,
            DaemonPayload::Satellite(payload) => &payload.identity,
        }
    }

    pub fn fingerprint(&self) -> Result<Fingerprint, serde_json::Error> {
        Fingerprint::of(self)
    }

    /// Parts a daemon running this payload works on, with their push flavors
    pub fn managed_parts(&self) -> BTreeMap<PartId, Fingerprint> {
        match self {
            DaemonPayload::Arbiter(_) => BTreeMap::new(),
            DaemonPayload::Scheduler(payload) => {
                BTreeMap::from([(payload.part.instance_id, payload.part.push_flavor.clone())])
            }
            DaemonPayload::Satellite(payload) => payload
                .schedulers
                .iter()
                .map(|(part_id, pointer)| (*part_id, pointer.push_flavor.clone()))
                .collect(),
        }
    }

    pub fn whole_conf(&self) -> Option<&FleetConfig> {
        match self {
            DaemonPayload::Arbiter(payload) => payload.whole_conf.as_ref(),
            _ => None,
        }
    }
}
