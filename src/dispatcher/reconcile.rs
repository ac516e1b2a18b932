use futures::{StreamExt, stream};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{DispatchResult, LinkError, ProtocolError},
    events::FleetEvent,
    links::{LinkId, SATELLITES},
    part::PartId,
    problems::ProblemKey,
    realm::RealmId,
};

use super::{DispatchState, Dispatcher};

/// What a scheduler bound to a part reports about it
enum SchedulerVerdict {
    Manages,
    /// No answer since the last push
    Unknown,
    Lost(&'static str),
}

impl Dispatcher {
    /// Probe every peer and classify the answers.
    ///
    /// Returns whether every configured peer confirmed its payload. A reachable
    /// peer not running its payload while the dispatcher is
    /// [`DispatchState::Dispatched`] moves it back to [`DispatchState::Prepared`];
    /// the push is redone by the next `dispatch`.
    #[instrument(skip(self))]
    pub async fn check_reachable(&mut self, forced: bool) -> bool {
        let (arbiter_link, concurrency) = (self.arbiter_link, self.probe_concurrency);
        let updates: Vec<_> = self
            .links
            .iter_mut()
            .filter(|link| link.id() != arbiter_link && link.active())
            .map(|link| async move {
                let id = link.id();
                (id, link.update_infos(forced, false).await)
            })
            .collect();
        let results: Vec<(LinkId, Result<Option<bool>, LinkError>)> =
            stream::iter(updates).buffered(concurrency).collect().await;

        let mut not_configured = Vec::new();
        let mut drift = false;

        for (id, result) in results {
            let (name, daemon_type) = {
                let link = &self.links[id];
                (link.name().to_string(), link.daemon_type())
            };
            let not_configured_key = ProblemKey::NotConfigured {
                daemon: name.clone(),
                daemon_type,
            };

            match result {
                Ok(None) => {}
                Ok(Some(confirmed)) => {
                    self.mark_alive(id);
                    let has_payload = self.links[id].cfg.is_some();

                    if confirmed {
                        self.clear_problem(not_configured_key);
                        if !self.ever_dispatched {
                            not_configured.push(id);
                        }
                    } else if has_payload {
                        debug!("{daemon_type} '{name}' does not run its configuration");
                        not_configured.push(id);
                        let link = &mut self.links[id];
                        if link.configuration_sent {
                            warn!("{daemon_type} '{name}' lost its configuration");
                            link.rearm_push();
                        }
                        // also a payload never sent because the daemon was unreachable
                        if self.state == DispatchState::Dispatched {
                            drift = true;
                        }
                        if self.ever_dispatched {
                            self.raise_problem(not_configured_key, "configuration not running");
                        }
                    }
                }
                Err(e) => {
                    warn!("{daemon_type} '{name}' is not reachable: {e}");
                    self.raise_problem(
                        ProblemKey::Unreachable {
                            daemon: name.clone(),
                            daemon_type,
                        },
                        e.to_string(),
                    );

                    let link = &mut self.links[id];
                    let out_of_attempts = link.record_failed_probe();
                    if out_of_attempts && link.set_dead() {
                        warn!(
                            "{daemon_type} '{name}' is dead after {} failed probes",
                            link.attempt()
                        );
                        self.emit(FleetEvent::LinkDead {
                            daemon: name.clone(),
                            daemon_type,
                        });
                        self.raise_problem(
                            ProblemKey::Dead {
                                daemon: name.clone(),
                                daemon_type,
                            },
                            "too many failed probes",
                        );
                    }

                    if self.links[id].cfg.is_some() {
                        not_configured.push(id);
                    }
                }
            }
        }

        if drift {
            let next = self.state.drift();
            self.set_state(next);
        }

        if !not_configured.is_empty() {
            debug!("{} daemon(s) not configured yet", not_configured.len());
        }
        not_configured.is_empty()
    }

    fn mark_alive(&mut self, id: LinkId) {
        let link = &mut self.links[id];
        let (name, daemon_type) = (link.name().to_string(), link.daemon_type());
        if link.set_alive() {
            info!("{daemon_type} '{name}' is alive again");
            self.emit(FleetEvent::LinkAlive {
                daemon: name.clone(),
                daemon_type,
            });
        }
        self.clear_problem(ProblemKey::Unreachable {
            daemon: name.clone(),
            daemon_type,
        });
        self.clear_problem(ProblemKey::Dead {
            daemon: name,
            daemon_type,
        });
    }

    /// Check every part against what its scheduler and satellites report.
    ///
    /// A part whose scheduler is gone or runs something else is unbound; a
    /// part served by fewer satellites than expected gets its fan-out re-armed.
    /// Either moves the dispatcher to [`DispatchState::Idle`] so the next round
    /// prepares again. Returns whether everything checked out.
    #[instrument(skip(self))]
    pub fn check_dispatch(&mut self) -> DispatchResult<bool> {
        if !self.ever_dispatched {
            return Err(ProtocolError::NeverDispatched.into());
        }

        let mut ok = true;
        let mut need_prepare = false;

        for realm_id in self.realms.ids() {
            let part_ids: Vec<PartId> = self.realms[realm_id]
                .parts()
                .map(|part| part.instance_id())
                .collect();

            for part_id in part_ids {
                match self.scheduler_verdict(realm_id, part_id) {
                    None => {
                        debug!("part {part_id} has no scheduler");
                        ok = false;
                        need_prepare = true;
                        continue;
                    }
                    Some(SchedulerVerdict::Manages) => {}
                    Some(SchedulerVerdict::Unknown) => {
                        debug!("part {part_id} is not confirmed by its scheduler yet");
                        ok = false;
                    }
                    Some(SchedulerVerdict::Lost(reason)) => {
                        warn!("part {part_id}: {reason}, it will be dispatched again");
                        self.unbind_part(realm_id, part_id)?;
                        ok = false;
                        need_prepare = true;
                        continue;
                    }
                }

                if !self.check_satellites(realm_id, part_id)? {
                    ok = false;
                    need_prepare = true;
                }
            }
        }

        self.last_check_ok = ok;
        if need_prepare {
            self.set_state(DispatchState::Idle);
        }
        Ok(ok)
    }

    fn scheduler_verdict(&self, realm_id: RealmId, part_id: PartId) -> Option<SchedulerVerdict> {
        let part = self.realms[realm_id].part(part_id)?;
        let scheduler = self.links.get(part.scheduler_link()?)?;

        let verdict = if !scheduler.active() || !scheduler.alive() {
            SchedulerVerdict::Lost("its scheduler is dead")
        } else if scheduler.cfg_to_manage() != Some(part_id) {
            SchedulerVerdict::Lost("its scheduler manages another part")
        } else if scheduler.cfg_managed().is_none() {
            SchedulerVerdict::Unknown
        } else if scheduler.manages(part) {
            SchedulerVerdict::Manages
        } else {
            SchedulerVerdict::Lost("its scheduler does not run it")
        };
        Some(verdict)
    }

    /// Release a part from its scheduler and from the satellites serving it
    fn unbind_part(&mut self, realm_id: RealmId, part_id: PartId) -> DispatchResult<()> {
        let Some(part) = self.realms[realm_id].parts.get_mut(&part_id) else {
            return Ok(());
        };
        if let Some(scheduler) = part.unbind() {
            let link = &mut self.links[scheduler];
            link.reset_configuration();
            link.need_conf = link.active();
        }

        let realm = &mut self.realms[realm_id];
        for daemon_type in SATELLITES {
            realm.set_need_dispatch(daemon_type, part_id, false);
        }
        for daemon_type in SATELLITES {
            self.release_pointers(realm_id, daemon_type, part_id)?;
        }
        Ok(())
    }

    /// Whether enough satellites of every type serve the part, re-arming the
    /// fan-out of the types that fall short.
    ///
    /// An unreachable satellite is assumed to still run its configuration.
    fn check_satellites(&mut self, realm_id: RealmId, part_id: PartId) -> DispatchResult<bool> {
        let mut ok = true;

        for daemon_type in SATELLITES {
            let realm = &self.realms[realm_id];
            let Some(part) = realm.part(part_id) else {
                continue;
            };
            if realm.scheduler_pointer(daemon_type, part_id).is_none() {
                continue;
            }

            let must_have = realm.get_nb_of_must_have_satellites(daemon_type);
            let serving = realm
                .managed_by(daemon_type, part_id)
                .iter()
                .map(|id| &self.links[*id])
                .filter(|link| {
                    link.alive()
                        && (!link.reachable() || link.cfg_managed().is_none() || link.manages(part))
                })
                .count();
            let available = realm
                .get_potential_satellites_by_type(&self.links, daemon_type)
                .into_iter()
                .filter(|id| self.links[*id].active() && self.links[*id].alive())
                .count();
            let expected = must_have.min(available);

            if serving < expected {
                warn!(
                    "realm '{}': part {part_id} is served by {serving} {daemon_type}(s), {expected} expected",
                    realm.name()
                );
                self.release_pointers(realm_id, daemon_type, part_id)?;
                self.realms[realm_id].set_need_dispatch(daemon_type, part_id, true);
                ok = false;
            }
        }

        Ok(ok)
    }

    /// Clean up daemons running something they should not.
    ///
    /// A daemon without payload that reports running parts is told to wait for
    /// a new configuration. A daemon reporting other parts than its payload
    /// holds gets its push re-armed.
    #[instrument(skip(self))]
    pub async fn check_bad_dispatch(&mut self) {
        let ids: Vec<LinkId> = self
            .schedulers
            .iter()
            .chain(self.satellites.iter())
            .copied()
            .collect();

        let mut drift = false;
        for id in ids {
            let link = &mut self.links[id];
            if !link.active() || !link.alive() || !link.reachable() {
                continue;
            }
            let Some(reported) = link.cfg_managed().map(|managed| managed.managed.clone()) else {
                continue;
            };

            let expected = link.cfg().map(|payload| payload.managed_parts());

            match expected {
                None if !reported.is_empty() => {
                    warn!(
                        "{} '{}' runs {} part(s) it was not given, asking it to wait for a new configuration",
                        link.daemon_type(),
                        link.name(),
                        reported.len()
                    );
                    if let Err(e) = link.wait_new_conf().await {
                        warn!("failed to reach '{}': {e}", link.name());
                    }
                }
                Some(expected) if link.configuration_sent && expected != reported => {
                    warn!(
                        "{} '{}' does not run the parts it was given",
                        link.daemon_type(),
                        link.name()
                    );
                    link.rearm_push();
                    drift = true;
                }
                _ => {}
            }
        }

        if drift {
            let next = self.state.drift();
            self.set_state(next);
        }
    }
}
