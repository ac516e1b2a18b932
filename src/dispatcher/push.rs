use tracing::{debug, info, instrument, trace, warn};

use crate::{
    error::DispatchResult,
    events::FleetEvent,
    links::{DaemonType, LinkId},
    problems::ProblemKey,
};

use super::{DispatchState, Dispatcher};

impl Dispatcher {
    /// Push the prepared payloads: spare arbiters first, then schedulers, then
    /// the other satellites.
    ///
    /// Daemons already sent their payload or inactive are skipped. Unreachable
    /// daemons are skipped once a dispatch went through, before that they keep
    /// the dispatch incomplete. Returns whether every daemon got its payload;
    /// only then the dispatcher moves to [`DispatchState::Dispatched`].
    #[instrument(skip(self))]
    pub async fn dispatch(&mut self) -> DispatchResult<bool> {
        self.state.ensure_dispatchable()?;
        info!("dispatching configuration");

        let order: Vec<LinkId> = self
            .arbiters
            .iter()
            .filter(|id| **id != self.arbiter_link)
            .chain(self.schedulers.iter())
            .chain(self.satellites.iter())
            .copied()
            .collect();

        let mut ok = true;
        for id in order {
            if !self.dispatch_to(id).await {
                ok = false;
            }
        }

        self.dispatch_ok = ok;
        if ok {
            self.ever_dispatched = true;
            self.set_state(DispatchState::Dispatched);
        } else {
            warn!("configuration dispatch is incomplete, it will be retried");
        }

        Ok(ok)
    }

    async fn dispatch_to(&mut self, id: LinkId) -> bool {
        let priming = !self.ever_dispatched;
        let link = &mut self.links[id];
        let (name, daemon_type) = (link.name().to_string(), link.daemon_type());

        if link.cfg.is_none() || link.configuration_sent {
            return true;
        }
        if !link.active() {
            trace!("{daemon_type} '{name}' is not active, skipping");
            return true;
        }
        if !link.reachable() {
            if priming {
                warn!("{daemon_type} '{name}' is not reachable, the first dispatch can not complete");
                return false;
            }
            debug!("{daemon_type} '{name}' is not reachable, will retry");
            return true;
        }
        if link.is_confirmed() {
            debug!("{daemon_type} '{name}' already runs its configuration");
            link.configuration_sent = true;
            return true;
        }

        let pushed = match link.push_configuration().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("failed to push configuration to {daemon_type} '{name}': {e}");
                false
            }
        };

        let mut ok = pushed;
        if pushed && daemon_type == DaemonType::Arbiter {
            if let Err(e) = link.do_not_run().await {
                warn!("failed to tell spare arbiter '{name}' not to run: {e}");
                ok = false;
            }
        }

        self.emit(FleetEvent::ConfigurationPushed {
            daemon: name.clone(),
            daemon_type,
            accepted: pushed,
        });

        let key = ProblemKey::PushFailed {
            daemon: name.clone(),
            daemon_type,
        };
        if ok {
            info!("configuration sent to {daemon_type} '{name}'");
            self.clear_problem(key);
        } else {
            warn!("configuration was not accepted by {daemon_type} '{name}'");
            self.raise_problem(key, "configuration push failed");
        }

        ok
    }
}
