use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{links::DaemonType, part::PartId, problems::Problem};

use super::{DispatchState, Dispatcher};

/// Point-in-time view of the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetStatus {
    pub state: DispatchState,
    pub dispatch_ok: bool,
    pub last_check_ok: bool,
    pub ever_dispatched: bool,
    pub stop_request_sent: bool,
    pub daemons: Vec<DaemonStatus>,
    pub parts: Vec<PartStatus>,
    pub problems: Vec<Problem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub name: String,
    pub daemon_type: DaemonType,
    pub uri: String,
    pub realm: String,
    pub spare: bool,
    pub active: bool,
    pub alive: bool,
    pub reachable: bool,
    pub running_id: Option<String>,
    pub last_ping: Option<DateTime<Utc>>,
    pub attempt: u32,
    pub configuration_sent: bool,
    pub confirmed: bool,
    pub hash: Option<String>,
    pub managed_parts: Vec<PartId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartStatus {
    pub part_id: PartId,
    pub realm: String,
    pub hosts: usize,
    pub scheduler: Option<String>,
    pub push_flavor: Option<String>,
}

impl Dispatcher {
    pub fn status(&self) -> FleetStatus {
        let daemons = self
            .links
            .iter()
            .map(|link| DaemonStatus {
                name: link.name().to_string(),
                daemon_type: link.daemon_type(),
                uri: link.uri(),
                realm: self.realm_of(link.id()).name().to_string(),
                spare: link.spare(),
                active: link.active(),
                alive: link.alive(),
                reachable: link.reachable(),
                running_id: link.running_id().map(str::to_string),
                last_ping: link.last_ping(),
                attempt: link.attempt(),
                configuration_sent: link.configuration_sent(),
                confirmed: link.is_confirmed(),
                hash: link.hash().map(|hash| hash.short().to_string()),
                managed_parts: link
                    .reported_parts()
                    .map(|parts| parts.collect())
                    .unwrap_or_default(),
            })
            .collect();

        let parts = self
            .realms
            .iter()
            .flat_map(|realm| {
                realm.parts().map(|part| PartStatus {
                    part_id: part.instance_id(),
                    realm: realm.name().to_string(),
                    hosts: part.host_count(),
                    scheduler: part
                        .scheduler_link()
                        .and_then(|id| self.links.get(id))
                        .map(|link| link.name().to_string()),
                    push_flavor: part.push_flavor().map(|flavor| flavor.short().to_string()),
                })
            })
            .collect();

        FleetStatus {
            state: self.state,
            dispatch_ok: self.dispatch_ok,
            last_check_ok: self.last_check_ok,
            ever_dispatched: self.ever_dispatched,
            stop_request_sent: self.stop_request_sent,
            daemons,
            parts,
            problems: self.problems.list(),
        }
    }

    /// Whether every active peer confirmed the payload prepared for it
    pub fn all_configured(&self) -> bool {
        self.peers()
            .filter(|link| link.cfg().is_some())
            .all(|link| link.is_confirmed() || !link.reachable())
    }
}
