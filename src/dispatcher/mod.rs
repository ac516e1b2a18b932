//! Configuration dispatcher
//!
//! The dispatcher owns every [`DaemonLink`] and [`Realm`] of one configuration
//! generation. It decides which scheduler runs which [`ConfigurationPart`],
//! which satellites work for which scheduler, pushes the resulting payloads and
//! keeps checking that the fleet still runs them.
//!
//! ```text
//! Idle ──prepare_dispatch──▶ Prepared ──dispatch (all pushes ok)──▶ Dispatched
//!  ▲                            ▲                                       │
//!  │                            └──────── check_reachable (drift) ──────┤
//!  └──────────────── check_dispatch (part unbound / undercount) ─────────┘
//! ```
//!
//! The assignment tables (`Realm::to_satellites*`, part bindings) are only ever
//! written from here.

mod prepare;
mod push;
mod reconcile;
mod state;
mod status;

use std::collections::HashSet;
use std::sync::Arc;

use futures::{StreamExt, stream};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    config::{ArbiterSettings, FleetConfig},
    error::{ConstructionError, DispatchResult},
    events::FleetEvent,
    links::{DaemonLink, DaemonType, LinkArena, LinkId},
    part::ConfigurationPart,
    payload::{DaemonIdentity, DaemonRef, GlobalSettings},
    problems::{Problem, ProblemKey, Problems},
    realm::{Realm, Realms},
};

pub use state::DispatchState;
pub use status::{DaemonStatus, FleetStatus, PartStatus};

pub struct Dispatcher {
    links: LinkArena,
    realms: Realms,
    /// The arbiter this process runs as
    arbiter_link: LinkId,
    arbiters: Vec<LinkId>,
    schedulers: Vec<LinkId>,
    satellites: Vec<LinkId>,
    global: GlobalSettings,
    whole_conf: Arc<FleetConfig>,

    state: DispatchState,
    ever_dispatched: bool,
    dispatch_ok: bool,
    last_check_ok: bool,
    stop_request_sent: bool,

    probe_concurrency: usize,
    problems: Problems,
    event_tx: Option<broadcast::Sender<FleetEvent>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state)
            .field("links", &self.links.len())
            .field("realms", &self.realms.len())
            .field("dispatch_ok", &self.dispatch_ok)
            .field("last_check_ok", &self.last_check_ok)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Build a dispatcher for one configuration generation.
    ///
    /// Fails when the local arbiter is not declared, can not dispatch, or when a
    /// second master arbiter is declared. Nothing is built in that case.
    pub fn new(
        links: LinkArena,
        mut realms: Realms,
        parts: Vec<ConfigurationPart>,
        settings: &ArbiterSettings,
        whole_conf: Arc<FleetConfig>,
    ) -> DispatchResult<Self> {
        let mut seen = HashSet::new();
        for link in links.iter() {
            if !seen.insert((link.daemon_type(), link.name())) {
                return Err(ConstructionError::DuplicateDaemon {
                    daemon_type: link.daemon_type(),
                    name: link.name().to_string(),
                }
                .into());
            }
        }

        let masters: Vec<&DaemonLink> = links
            .of_type(DaemonType::Arbiter)
            .filter(|link| !link.spare())
            .collect();
        if let [first, second, ..] = masters.as_slice() {
            return Err(ConstructionError::TwoMasterArbiters {
                first: first.name().to_string(),
                second: second.name().to_string(),
            }
            .into());
        }

        let arbiter = links
            .find(DaemonType::Arbiter, &settings.name)
            .ok_or_else(|| ConstructionError::MissingArbiter(settings.name.clone()))?;
        if arbiter.spare() {
            return Err(ConstructionError::InvalidArbiter {
                name: settings.name.clone(),
                reason: "a spare arbiter does not dispatch".to_string(),
            }
            .into());
        }
        if !arbiter.active() {
            return Err(ConstructionError::InvalidArbiter {
                name: settings.name.clone(),
                reason: "the arbiter is not active".to_string(),
            }
            .into());
        }
        let arbiter_link = arbiter.id();

        for part in parts {
            let Some(realm) = realms.get(part.realm()) else {
                return Err(ConstructionError::UnknownRealm(part.realm_name().to_string()).into());
            };
            let realm_id = realm.id();
            realms[realm_id].add_part(part);
        }
        realms.refresh_must_have(&links);

        let ids_of = |filter: &dyn Fn(DaemonType) -> bool| -> Vec<LinkId> {
            links
                .iter()
                .filter(|link| filter(link.daemon_type()))
                .map(DaemonLink::id)
                .collect()
        };
        let arbiters = ids_of(&|t| t == DaemonType::Arbiter);
        let schedulers = ids_of(&|t| t == DaemonType::Scheduler);
        let satellites = ids_of(&|t| t.is_satellite());

        debug!(
            "dispatcher built with {} arbiter(s), {} scheduler(s), {} satellite(s), {} part(s)",
            arbiters.len(),
            schedulers.len(),
            satellites.len(),
            realms.parts().count()
        );

        Ok(Self {
            links,
            realms,
            arbiter_link,
            arbiters,
            schedulers,
            satellites,
            global: GlobalSettings {
                config_name: settings.config_name.clone(),
                arbiter_name: settings.name.clone(),
            },
            whole_conf,
            state: DispatchState::Idle,
            ever_dispatched: false,
            dispatch_ok: false,
            last_check_ok: false,
            stop_request_sent: false,
            probe_concurrency: settings.probe_concurrency.max(1),
            problems: Problems::new(),
            event_tx: None,
        })
    }

    /// Publish fleet events on `event_tx`
    pub fn with_event_sender(mut self, event_tx: broadcast::Sender<FleetEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn new_to_dispatch(&self) -> bool {
        self.state.new_to_dispatch()
    }

    pub fn first_dispatch_done(&self) -> bool {
        self.state.first_dispatch_done()
    }

    /// Whether a dispatch ever completed in this generation
    pub fn ever_dispatched(&self) -> bool {
        self.ever_dispatched
    }

    pub fn dispatch_ok(&self) -> bool {
        self.dispatch_ok
    }

    pub fn last_check_ok(&self) -> bool {
        self.last_check_ok
    }

    pub fn stop_request_sent(&self) -> bool {
        self.stop_request_sent
    }

    pub fn links(&self) -> &LinkArena {
        &self.links
    }

    pub fn link(&self, daemon_type: DaemonType, name: &str) -> Option<&DaemonLink> {
        self.links.find(daemon_type, name)
    }

    pub fn realms(&self) -> &Realms {
        &self.realms
    }

    pub fn arbiter_link(&self) -> LinkId {
        self.arbiter_link
    }

    pub fn arbiters(&self) -> &[LinkId] {
        &self.arbiters
    }

    pub fn schedulers(&self) -> &[LinkId] {
        &self.schedulers
    }

    pub fn satellites(&self) -> &[LinkId] {
        &self.satellites
    }

    pub fn whole_conf(&self) -> &Arc<FleetConfig> {
        &self.whole_conf
    }

    pub fn problems(&self) -> Vec<Problem> {
        self.problems.list()
    }

    pub fn has_problem(&self, key: &ProblemKey) -> bool {
        self.problems.contains(key)
    }

    /// Links the arbiter talks to: active, and not the arbiter itself
    fn peers(&self) -> impl Iterator<Item = &DaemonLink> {
        let arbiter_link = self.arbiter_link;
        self.links
            .iter()
            .filter(move |link| link.id() != arbiter_link && link.active())
    }

    fn emit(&self, event: FleetEvent) {
        let Some(event_tx) = &self.event_tx else {
            return;
        };
        // no subscriber is fine
        match event_tx.send(event) {
            Ok(receivers) => trace!("published fleet event to {receivers} receivers"),
            Err(_) => trace!("no receivers for fleet event"),
        }
    }

    fn set_state(&mut self, to: DispatchState) {
        let from = self.state;
        if from != to {
            info!("dispatch state {from} -> {to}");
            self.state = to;
            self.emit(FleetEvent::StateChanged { from, to });
        }
    }

    fn raise_problem(&mut self, key: ProblemKey, message: impl Into<String>) {
        let message = message.into();
        if self.problems.raise(key.clone(), message.clone()) {
            self.emit(FleetEvent::ProblemRaised {
                problem: Problem {
                    key,
                    message,
                    since: chrono::Utc::now(),
                },
            });
        }
    }

    fn clear_problem(&mut self, key: ProblemKey) {
        if self.problems.clear(&key) {
            debug!("resolved: {key}");
            self.emit(FleetEvent::ProblemCleared { key });
        }
    }

    fn identity(&self, id: LinkId) -> DaemonIdentity {
        let link = &self.links[id];
        DaemonIdentity {
            name: link.name().to_string(),
            daemon_type: link.daemon_type(),
            uuid: link.uuid(),
            realm: self.realms[link.realm()].name().to_string(),
            spare: link.spare(),
        }
    }

    fn daemon_ref(&self, id: LinkId) -> DaemonRef {
        let link = &self.links[id];
        DaemonRef {
            name: link.name().to_string(),
            daemon_type: link.daemon_type(),
            uri: link.uri(),
            realm: self.realms[link.realm()].name().to_string(),
            spare: link.spare(),
        }
    }

    fn realm_of(&self, id: LinkId) -> &Realm {
        &self.realms[self.links[id].realm()]
    }

    /// Ask every reachable peer to stop.
    ///
    /// Each daemon gets at most one request per kind of stop. Returns whether
    /// every request went through.
    #[instrument(skip(self))]
    pub async fn stop_request(&mut self, stop_now: bool) -> bool {
        let (arbiter_link, concurrency) = (self.arbiter_link, self.probe_concurrency);
        let requests: Vec<_> = self
            .links
            .iter_mut()
            .filter(|link| link.id() != arbiter_link && link.active() && link.reachable())
            .map(|link| async move {
                let name = format!("{} '{}'", link.daemon_type(), link.name());
                (name, link.stop_request(stop_now).await)
            })
            .collect();
        let results: Vec<_> = stream::iter(requests).buffered(concurrency).collect().await;

        let mut all_sent = true;
        for (name, result) in results {
            match result {
                Ok(true) => debug!("stop requested from {name}"),
                Ok(false) => {}
                Err(e) => {
                    warn!("failed to request stop from {name}: {e}");
                    all_sent = false;
                }
            }
        }

        self.stop_request_sent = true;
        all_sent
    }

    /// Probe every peer a stop was requested from, returns how many still answer.
    pub async fn count_running_peers(&mut self) -> usize {
        let (arbiter_link, concurrency) = (self.arbiter_link, self.probe_concurrency);
        let checks: Vec<_> = self
            .links
            .iter_mut()
            .filter(|link| {
                link.id() != arbiter_link && link.active() && link.stop_requested().is_some()
            })
            .map(|link| async move { link.update_infos(true, false).await.is_ok() })
            .collect();
        let answers: Vec<bool> = stream::iter(checks).buffered(concurrency).collect().await;
        answers.into_iter().filter(|running| *running).count()
    }

    /// Fetch the events buffered by reachable peers into their links
    pub async fn collect_events(&mut self) -> usize {
        let (arbiter_link, concurrency) = (self.arbiter_link, self.probe_concurrency);
        let fetches: Vec<_> = self
            .links
            .iter_mut()
            .filter(|link| link.id() != arbiter_link && link.active() && link.reachable())
            .map(|link| async move {
                let name = link.name().to_string();
                (name, link.fetch_events().await)
            })
            .collect();
        let results: Vec<_> = stream::iter(fetches).buffered(concurrency).collect().await;

        results
            .into_iter()
            .map(|(name, result)| match result {
                Ok(count) => count,
                Err(e) => {
                    debug!("failed to fetch events from '{name}': {e}");
                    0
                }
            })
            .sum()
    }

    /// Publish and forget every event buffered in the links
    pub fn publish_events(&mut self) -> usize {
        let mut events = Vec::new();
        for link in self.links.iter_mut() {
            let (name, daemon_type) = (link.name().to_string(), link.daemon_type());
            events.extend(link.drain_events().into_iter().map(|event| FleetEvent::Daemon {
                daemon: name.clone(),
                daemon_type,
                event,
            }));
        }

        let count = events.len();
        for event in events {
            if let FleetEvent::Daemon {
                daemon,
                daemon_type,
                event,
            } = &event
            {
                debug!("{daemon_type} '{daemon}': [{}] {}", event.kind, event.message);
            }
            self.emit(event);
        }
        count
    }

    /// Take over sessions and undelivered events from the dispatcher of the
    /// previous configuration generation.
    ///
    /// Events of daemons that disappeared are published right away. Returns
    /// how many links were matched.
    pub fn inherit_from(&mut self, previous: &mut Dispatcher) -> usize {
        let mut matched = 0;
        let mut orphans = Vec::new();

        for old in previous.links.iter_mut() {
            match self.links.find_mut(old.daemon_type(), old.name()) {
                Some(new) => {
                    new.migrate_from(old);
                    matched += 1;
                }
                None => {
                    let (name, daemon_type) = (old.name().to_string(), old.daemon_type());
                    orphans.extend(old.drain_events().into_iter().map(|event| {
                        FleetEvent::Daemon {
                            daemon: name.clone(),
                            daemon_type,
                            event,
                        }
                    }));
                }
            }
        }

        for event in orphans {
            self.emit(event);
        }

        info!("took over {matched} link(s) from the previous configuration");
        matched
    }
}
