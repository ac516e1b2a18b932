use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
    error::DispatchResult,
    links::{DaemonType, LinkId, SATELLITES},
    part::PartId,
    payload::{
        ArbiterPayload, DaemonPayload, SatellitePayload, SchedulerPayload, SchedulerPointer,
    },
    problems::ProblemKey,
    realm::RealmId,
};

use super::Dispatcher;

/// Satellite types a scheduler has to know about
const SCHEDULER_SATELLITES: [DaemonType; 3] = [
    DaemonType::Poller,
    DaemonType::Reactionner,
    DaemonType::Broker,
];

impl Dispatcher {
    /// Compute which daemon runs what, and the payload of every daemon.
    ///
    /// Fails with [`crate::error::ProtocolError::AlreadyPrepared`] while a
    /// prepared configuration still waits for its push; nothing is touched then.
    #[instrument(skip(self))]
    pub fn prepare_dispatch(&mut self) -> DispatchResult<()> {
        let next = self.state.prepare()?;
        info!("preparing the configuration dispatch");

        for id in self.schedulers.clone() {
            let link = &mut self.links[id];
            if link.active() && link.cfg_to_manage.is_none() {
                link.need_conf = true;
            }
        }

        self.prepare_arbiters()?;

        for realm_id in self.realms.ids() {
            self.prepare_realm(realm_id)?;
        }

        self.prepare_idle_satellites()?;

        let unassigned = self.realms.parts().filter(|part| !part.is_assigned()).count();
        if unassigned > 0 {
            warn!("{unassigned} configuration part(s) could not be assigned to a scheduler");
        }

        for id in self.schedulers.clone() {
            let link = &mut self.links[id];
            if link.cfg_to_manage.is_none() && link.need_conf {
                trace!("scheduler '{}' has nothing to manage", link.name());
                link.need_conf = false;
            }
        }

        self.dispatch_ok = false;
        self.set_state(next);
        Ok(())
    }

    fn prepare_arbiters(&mut self) -> DispatchResult<()> {
        for id in self.arbiters.clone() {
            let is_self = id == self.arbiter_link;
            let link = &self.links[id];
            if !link.active() {
                continue;
            }

            let whole_conf = (!is_self && link.spare()).then(|| (*self.whole_conf).clone());
            let payload = DaemonPayload::Arbiter(ArbiterPayload {
                identity: self.identity(id),
                global: self.global.clone(),
                whole_conf,
            });

            let link = &mut self.links[id];
            link.install_payload(payload)?;
            if is_self {
                link.configuration_sent = true;
            }
        }
        Ok(())
    }

    /// Schedulers able to take a part of the realm, most preferred first:
    /// alive masters, alive spares, then everything else.
    fn scheduler_pool(&self, realm_id: RealmId) -> VecDeque<LinkId> {
        let mut pool: Vec<_> = self.realms[realm_id]
            .get_potential_satellites_by_type(&self.links, DaemonType::Scheduler)
            .into_iter()
            .filter(|id| self.links[*id].active())
            .map(|id| {
                let link = &self.links[id];
                let rank = match (link.alive(), link.spare()) {
                    (true, false) => 0,
                    (true, true) => 1,
                    (false, _) => 2,
                };
                (rank, id)
            })
            .collect();
        pool.sort();
        pool.into_iter().map(|(_, id)| id).collect()
    }

    fn prepare_realm(&mut self, realm_id: RealmId) -> DispatchResult<()> {
        let realm_name = self.realms[realm_id].name().to_string();
        let unassigned: Vec<PartId> = self.realms[realm_id]
            .parts()
            .filter(|part| !part.is_assigned())
            .map(|part| part.instance_id())
            .collect();

        if !unassigned.is_empty() {
            let mut pool = self.scheduler_pool(realm_id);
            debug!(
                "realm '{realm_name}': {} part(s) to assign, {} scheduler(s) available",
                unassigned.len(),
                pool.len()
            );

            for part_id in unassigned {
                let mut chosen = None;
                while let Some(candidate) = pool.pop_front() {
                    if self.links[candidate].need_conf {
                        chosen = Some(candidate);
                        break;
                    }
                    trace!(
                        "scheduler '{}' does not need a configuration",
                        self.links[candidate].name()
                    );
                }

                match chosen {
                    Some(scheduler) => self.assign_part(realm_id, part_id, scheduler)?,
                    None => {
                        warn!("realm '{realm_name}': no scheduler available for part {part_id}");
                        let realm = &mut self.realms[realm_id];
                        for daemon_type in SATELLITES {
                            realm.set_need_dispatch(daemon_type, part_id, false);
                        }
                        self.raise_problem(
                            ProblemKey::UnassignedPart {
                                realm: realm_name.clone(),
                                part: part_id,
                            },
                            "no scheduler available",
                        );
                    }
                }
            }
        }

        let assigned: Vec<PartId> = self.realms[realm_id]
            .parts()
            .filter(|part| part.is_assigned())
            .map(|part| part.instance_id())
            .collect();
        for part_id in assigned {
            for daemon_type in SATELLITES {
                if self.realms[realm_id].need_dispatch(daemon_type, part_id) {
                    self.fan_out(realm_id, part_id, daemon_type)?;
                } else {
                    trace!("realm '{realm_name}': nothing to dispatch to {daemon_type}s for part {part_id}");
                }
            }
        }

        Ok(())
    }

    /// Bind a part to a scheduler and build the scheduler payload
    fn assign_part(
        &mut self,
        realm_id: RealmId,
        part_id: PartId,
        scheduler: LinkId,
    ) -> DispatchResult<()> {
        let Some(part) = self.realms[realm_id].parts.get_mut(&part_id) else {
            return Ok(());
        };
        if let Err(owner) = part.bind(scheduler) {
            error!(
                "part {part_id} is still bound to '{}', not rebinding it",
                self.links[owner].name()
            );
            return Ok(());
        }
        let serialized = part.serialize_for_push()?;
        let push_flavor = serialized.push_flavor.clone();

        let realm = &self.realms[realm_id];
        let satellites = SCHEDULER_SATELLITES
            .iter()
            .flat_map(|t| realm.get_potential_satellites_by_type(&self.links, *t))
            .map(|id| self.daemon_ref(id))
            .collect();
        let arbiters = if self.links[scheduler].manage_arbiters() {
            self.arbiters.iter().map(|id| self.daemon_ref(*id)).collect()
        } else {
            Vec::new()
        };

        let payload = DaemonPayload::Scheduler(SchedulerPayload {
            identity: self.identity(scheduler),
            global: self.global.clone(),
            part: serialized,
            satellites,
            arbiters,
            modules: self.links[scheduler].modules().to_vec(),
        });

        let link = &mut self.links[scheduler];
        link.install_payload(payload)?;
        link.cfg_to_manage = Some(part_id);
        link.need_conf = false;
        info!(
            "part {part_id} assigned to scheduler '{}' ({})",
            link.name(),
            push_flavor.short()
        );

        let realm_name = self.realms[realm_id].name().to_string();
        self.clear_problem(ProblemKey::UnassignedPart {
            realm: realm_name,
            part: part_id,
        });

        let pointer = SchedulerPointer {
            part_id,
            scheduler: self.daemon_ref(scheduler),
            push_flavor,
        };
        for daemon_type in SATELLITES {
            self.release_pointers(realm_id, daemon_type, part_id)?;
            let realm = &mut self.realms[realm_id];
            realm.set_pointer(daemon_type, pointer.clone());
            realm.set_need_dispatch(daemon_type, part_id, true);
        }

        Ok(())
    }

    /// Remove the pointer to a part from every satellite of a type serving it
    pub(super) fn release_pointers(
        &mut self,
        realm_id: RealmId,
        daemon_type: DaemonType,
        part_id: PartId,
    ) -> DispatchResult<()> {
        let managed_by =
            std::mem::take(self.realms[realm_id].managed_by_mut(daemon_type, part_id));
        for id in managed_by {
            self.links[id].remove_scheduler_pointer(part_id)?;
        }
        Ok(())
    }

    fn satellite_base(&self, id: LinkId) -> SatellitePayload {
        SatellitePayload {
            identity: self.identity(id),
            global: self.global.clone(),
            schedulers: BTreeMap::new(),
            modules: self.links[id].modules().to_vec(),
        }
    }

    /// Hand the scheduler pointer of a part to satellites of one type, up to the
    /// realm's must-have count.
    fn fan_out(
        &mut self,
        realm_id: RealmId,
        part_id: PartId,
        daemon_type: DaemonType,
    ) -> DispatchResult<()> {
        let realm = &self.realms[realm_id];
        let realm_name = realm.name().to_string();
        let must_have = realm.get_nb_of_must_have_satellites(daemon_type);
        let Some(pointer) = realm.scheduler_pointer(daemon_type, part_id).cloned() else {
            self.realms[realm_id].set_need_dispatch(daemon_type, part_id, false);
            return Ok(());
        };

        let mut managed = realm.managed_by(daemon_type, part_id).to_vec();
        let candidates: Vec<LinkId> = realm
            .get_potential_satellites_by_type(&self.links, daemon_type)
            .into_iter()
            .filter(|id| {
                let link = &self.links[*id];
                link.active() && link.alive() && !managed.contains(id)
            })
            .collect();

        for candidate in candidates {
            if managed.len() >= must_have {
                break;
            }
            let base = self.satellite_base(candidate);
            self.links[candidate].add_scheduler_pointer(|| base, pointer.clone())?;
            debug!(
                "part {part_id} of realm '{realm_name}' dispatched to {daemon_type} '{}'",
                self.links[candidate].name()
            );
            managed.push(candidate);
        }

        let undercount = ProblemKey::Undercount {
            realm: realm_name.clone(),
            daemon_type,
            part: part_id,
        };
        if managed.len() < must_have {
            warn!(
                "realm '{realm_name}': part {part_id} has {} {daemon_type}(s), {must_have} wanted",
                managed.len()
            );
            self.raise_problem(
                undercount,
                format!("{} of {must_have} {daemon_type}(s)", managed.len()),
            );
        } else {
            self.clear_problem(undercount);
        }
        if managed.len() > must_have {
            error!(
                "realm '{realm_name}': part {part_id} is managed by {} {daemon_type}(s), more than {must_have}",
                managed.len()
            );
        }

        let realm = &mut self.realms[realm_id];
        *realm.managed_by_mut(daemon_type, part_id) = managed;
        realm.set_need_dispatch(daemon_type, part_id, false);
        Ok(())
    }

    /// Give an empty satellite payload to satellites no part was handed to, so
    /// they are configured too.
    fn prepare_idle_satellites(&mut self) -> DispatchResult<()> {
        for id in self.satellites.clone() {
            if self.links[id].active() && self.links[id].cfg.is_none() {
                let payload = DaemonPayload::Satellite(self.satellite_base(id));
                self.links[id].install_payload(payload)?;
            }
        }
        Ok(())
    }
}
