//! Configuration parts
//!
//! A [`ConfigurationPart`] is a slice of the monitored hosts of one realm. It is
//! the unit of assignment: at any time a part is bound to at most one scheduler.
//! Host membership never changes after creation; only the binding does, and only
//! the dispatcher changes it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{fingerprint::Fingerprint, links::LinkId, realm::RealmId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartId(pub u32);

impl fmt::Display for PartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A monitored host and the services checked on it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredHost {
    pub name: String,
    pub address: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub services: BTreeSet<String>,
}

impl MonitoredHost {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            parents: Vec::new(),
            services: BTreeSet::new(),
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.services.insert(service.into());
        self
    }
}

/// Transport form of a part, as shipped inside a scheduler payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedPart {
    pub instance_id: PartId,
    pub realm: String,
    pub hosts: Vec<MonitoredHost>,
    pub push_flavor: Fingerprint,
}

/// Fingerprinted content of a part (everything but the flavor itself)
#[derive(Serialize)]
struct PartContent<'a> {
    instance_id: PartId,
    realm: &'a str,
    hosts: Vec<&'a MonitoredHost>,
}

#[derive(Debug, Clone)]
pub struct ConfigurationPart {
    instance_id: PartId,
    uuid: Uuid,
    realm: RealmId,
    realm_name: String,
    hosts: BTreeMap<String, MonitoredHost>,
    push_flavor: Option<Fingerprint>,
    is_assigned: bool,
    scheduler_link: Option<LinkId>,
}

impl ConfigurationPart {
    pub fn new(
        instance_id: PartId,
        realm: RealmId,
        realm_name: impl Into<String>,
        hosts: impl IntoIterator<Item = MonitoredHost>,
    ) -> Self {
        Self {
            instance_id,
            uuid: Uuid::new_v4(),
            realm,
            realm_name: realm_name.into(),
            hosts: hosts
                .into_iter()
                .map(|host| (host.name.clone(), host))
                .collect(),
            push_flavor: None,
            is_assigned: false,
            scheduler_link: None,
        }
    }

    pub fn instance_id(&self) -> PartId {
        self.instance_id
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn realm(&self) -> RealmId {
        self.realm
    }

    pub fn realm_name(&self) -> &str {
        &self.realm_name
    }

    pub fn hosts(&self) -> impl Iterator<Item = &MonitoredHost> {
        self.hosts.values()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn contains_host(&self, name: &str) -> bool {
        self.hosts.contains_key(name)
    }

    /// Flavor computed by the last [`ConfigurationPart::serialize_for_push`]
    pub fn push_flavor(&self) -> Option<&Fingerprint> {
        self.push_flavor.as_ref()
    }

    pub fn is_assigned(&self) -> bool {
        self.is_assigned
    }

    pub fn scheduler_link(&self) -> Option<LinkId> {
        self.scheduler_link
    }

    pub fn compute_push_flavor(&self) -> Result<Fingerprint, serde_json::Error> {
        Fingerprint::of(&PartContent {
            instance_id: self.instance_id,
            realm: &self.realm_name,
            hosts: self.hosts.values().collect(),
        })
    }

    /// Serialize the part for transport, recomputing and storing its push flavor.
    pub fn serialize_for_push(&mut self) -> Result<SerializedPart, serde_json::Error> {
        let push_flavor = self.compute_push_flavor()?;
        self.push_flavor = Some(push_flavor.clone());

        Ok(SerializedPart {
            instance_id: self.instance_id,
            realm: self.realm_name.clone(),
            hosts: self.hosts.values().cloned().collect(),
            push_flavor,
        })
    }

    /// Bind the part to a scheduler.
    ///
    /// Fails with the current owner when the part is bound to another scheduler;
    /// the binding has to be cleared with [`ConfigurationPart::unbind`] first.
    pub(crate) fn bind(&mut self, scheduler: LinkId) -> Result<(), LinkId> {
        match self.scheduler_link {
            Some(owner) if owner != scheduler => Err(owner),
            _ => {
                self.is_assigned = true;
                self.scheduler_link = Some(scheduler);
                Ok(())
            }
        }
    }

    pub(crate) fn unbind(&mut self) -> Option<LinkId> {
        self.is_assigned = false;
        self.scheduler_link.take()
    }
}
