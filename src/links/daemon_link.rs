use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, instrument, trace, warn};
use uuid::Uuid;

use crate::{
    DaemonEvent, ManagedConfigurations, PushRequest,
    config::{DaemonConfig, LaunchSpec},
    error::LinkError,
    fingerprint::Fingerprint,
    part::{ConfigurationPart, PartId},
    payload::{DaemonPayload, SatellitePayload, SchedulerPointer},
    realm::RealmId,
};

use super::{DaemonType, LinkId, LinkTarget, Transport};

/// Kind of stop request already sent to a daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopKind {
    Graceful,
    Immediate,
}

/// Arbiter-side proxy of one remote daemon
///
/// Liveness fields are only written from this link's own RPC round-trips. The
/// link never declares itself dead; the dispatcher does that through
/// [`DaemonLink::set_dead`] after interpreting failed probes.
pub struct DaemonLink {
    id: LinkId,
    name: String,
    daemon_type: DaemonType,
    uuid: Uuid,
    address: String,
    port: u16,
    realm: RealmId,
    spare: bool,
    active: bool,
    manage_arbiters: bool,
    manage_sub_realms: bool,
    modules: Vec<String>,
    polling_interval: Duration,
    timeout: Duration,
    max_check_attempts: u32,
    token: Option<String>,
    launch: Option<LaunchSpec>,

    alive: bool,
    reachable: bool,
    running_id: Option<String>,
    last_ping: Option<DateTime<Utc>>,
    last_probe: Option<Instant>,
    attempt: u32,

    /// Payload being built for the daemon
    pub(crate) cfg: Option<DaemonPayload>,
    /// Part a scheduler is bound to
    pub(crate) cfg_to_manage: Option<PartId>,
    push_flavor: Option<Fingerprint>,
    hash: Option<Fingerprint>,
    /// What the daemon last reported it runs, `None` until it answered
    cfg_managed: Option<ManagedConfigurations>,
    pub(crate) need_conf: bool,
    pub(crate) configuration_sent: bool,

    stop_requested: Option<StopKind>,
    events: Vec<DaemonEvent>,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for DaemonLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonLink")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("daemon_type", &self.daemon_type)
            .field("uri", &self.uri())
            .field("spare", &self.spare)
            .field("active", &self.active)
            .field("alive", &self.alive)
            .field("reachable", &self.reachable)
            .field("hash", &self.hash)
            .field("configuration_sent", &self.configuration_sent)
            .finish_non_exhaustive()
    }
}

impl DaemonLink {
    pub fn new(
        id: LinkId,
        config: &DaemonConfig,
        realm: RealmId,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            id,
            name: config.name.clone(),
            daemon_type: config.daemon_type,
            uuid: Uuid::new_v4(),
            address: config.address.clone(),
            port: config.port(),
            realm,
            spare: config.spare,
            active: config.active,
            manage_arbiters: config.manage_arbiters,
            manage_sub_realms: config.manage_sub_realms,
            modules: config.modules.clone(),
            polling_interval: Duration::from_secs(config.polling_interval),
            timeout: Duration::from_secs(config.timeout.max(1)),
            max_check_attempts: config.max_check_attempts.max(1),
            token: config.token.clone(),
            launch: config.launch.clone(),
            alive: true,
            reachable: true,
            running_id: None,
            last_ping: None,
            last_probe: None,
            attempt: 0,
            cfg: None,
            cfg_to_manage: None,
            push_flavor: None,
            hash: None,
            cfg_managed: None,
            need_conf: false,
            configuration_sent: false,
            stop_requested: None,
            events: Vec::new(),
            transport,
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn daemon_type(&self) -> DaemonType {
        self.daemon_type
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn uri(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    pub fn realm(&self) -> RealmId {
        self.realm
    }

    pub fn spare(&self) -> bool {
        self.spare
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn manage_arbiters(&self) -> bool {
        self.manage_arbiters
    }

    pub fn manage_sub_realms(&self) -> bool {
        self.manage_sub_realms
    }

    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    pub fn launch(&self) -> Option<&LaunchSpec> {
        self.launch.as_ref()
    }

    pub fn is_local(&self) -> bool {
        self.launch.is_some()
    }

    pub fn alive(&self) -> bool {
        self.alive
    }

    pub fn reachable(&self) -> bool {
        self.reachable
    }

    pub fn running_id(&self) -> Option<&str> {
        self.running_id.as_deref()
    }

    pub fn last_ping(&self) -> Option<DateTime<Utc>> {
        self.last_ping
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_check_attempts(&self) -> u32 {
        self.max_check_attempts
    }

    pub fn cfg(&self) -> Option<&DaemonPayload> {
        self.cfg.as_ref()
    }

    pub fn cfg_to_manage(&self) -> Option<PartId> {
        self.cfg_to_manage
    }

    pub fn push_flavor(&self) -> Option<&Fingerprint> {
        self.push_flavor.as_ref()
    }

    pub fn hash(&self) -> Option<&Fingerprint> {
        self.hash.as_ref()
    }

    pub fn cfg_managed(&self) -> Option<&ManagedConfigurations> {
        self.cfg_managed.as_ref()
    }

    pub fn need_conf(&self) -> bool {
        self.need_conf
    }

    pub fn configuration_sent(&self) -> bool {
        self.configuration_sent
    }

    pub fn stop_requested(&self) -> Option<StopKind> {
        self.stop_requested
    }

    pub fn pending_events(&self) -> &[DaemonEvent] {
        &self.events
    }

    pub fn target(&self) -> LinkTarget {
        LinkTarget {
            name: self.name.clone(),
            daemon_type: self.daemon_type,
            uri: self.uri(),
            token: self.token.clone(),
            timeout: self.timeout,
        }
    }

    /// Whether the daemon confirmed running exactly the payload prepared for it
    pub fn is_confirmed(&self) -> bool {
        match (&self.hash, &self.cfg_managed) {
            (Some(hash), Some(managed)) => managed.hash.as_ref() == Some(hash),
            _ => false,
        }
    }

    /// Probe the daemon session and the configuration it runs.
    ///
    /// Returns `Ok(None)` when the last probe is younger than the polling
    /// interval and `forced` is not set. Otherwise returns whether the daemon
    /// confirmed the payload prepared for it. With `test` set no call is made
    /// and the last known state is reported.
    #[instrument(skip(self), fields(daemon = %self.name, daemon_type = %self.daemon_type))]
    pub async fn update_infos(
        &mut self,
        forced: bool,
        test: bool,
    ) -> Result<Option<bool>, LinkError> {
        if !forced
            && let Some(last_probe) = self.last_probe
            && last_probe.elapsed() < self.polling_interval
        {
            trace!("probed {:?} ago, skipping", last_probe.elapsed());
            return Ok(None);
        }

        if test {
            return Ok(Some(self.is_confirmed()));
        }

        self.last_probe = Some(Instant::now());
        let target = self.target();

        let ping = match self.transport.ping(&target).await {
            Ok(ping) => ping,
            Err(e) => {
                self.reachable = false;
                return Err(e);
            }
        };

        self.reachable = true;
        self.last_ping = Some(Utc::now());

        if self.running_id.as_deref() != Some(ping.running_id.as_str()) {
            if self.running_id.is_some() {
                debug!("daemon restarted, new session {}", ping.running_id);
            }
            self.running_id = Some(ping.running_id);
            self.cfg_managed = None;
        }

        let managed = match self.transport.managed_configurations(&target).await {
            Ok(managed) => managed,
            Err(e) => {
                self.reachable = false;
                return Err(e);
            }
        };

        trace!("daemon manages {} part(s)", managed.managed.len());
        self.cfg_managed = Some(managed);

        Ok(Some(self.is_confirmed()))
    }

    /// Whether the daemon last reported running this part at its current flavor
    pub fn manages(&self, part: &ConfigurationPart) -> bool {
        let (Some(managed), Some(flavor)) = (&self.cfg_managed, part.push_flavor()) else {
            return false;
        };
        managed.managed.get(&part.instance_id()) == Some(flavor)
    }

    /// Parts the daemon last reported running, if it answered at all
    pub fn reported_parts(&self) -> Option<impl Iterator<Item = PartId> + '_> {
        self.cfg_managed
            .as_ref()
            .map(|managed| managed.managed.keys().copied())
    }

    /// Push the prepared payload.
    ///
    /// Returns whether the daemon accepted it. The confirmation of what the
    /// daemon runs is dropped until the next probe.
    #[instrument(skip(self), fields(daemon = %self.name, daemon_type = %self.daemon_type))]
    pub async fn push_configuration(&mut self) -> Result<bool, LinkError> {
        let (Some(payload), Some(hash)) = (&self.cfg, &self.hash) else {
            warn!("no configuration prepared");
            return Ok(false);
        };

        let request = PushRequest {
            hash: hash.clone(),
            payload: payload.clone(),
        };

        debug!("pushing configuration {}", hash.short());
        let response = self
            .transport
            .push_configuration(&self.target(), &request)
            .await?;

        if response.accepted {
            self.configuration_sent = true;
            self.cfg_managed = None;
        } else {
            warn!("configuration {} rejected", hash.short());
        }

        Ok(response.accepted)
    }

    /// Ask the daemon to stop, at most once per kind of stop.
    ///
    /// An immediate stop is sent even after a graceful one. Returns whether a
    /// request was sent.
    #[instrument(skip(self), fields(daemon = %self.name, daemon_type = %self.daemon_type))]
    pub async fn stop_request(&mut self, stop_now: bool) -> Result<bool, LinkError> {
        let kind = if stop_now {
            StopKind::Immediate
        } else {
            StopKind::Graceful
        };

        if self.stop_requested.is_some_and(|sent| sent >= kind) {
            trace!("stop already requested");
            return Ok(false);
        }

        self.transport.stop_request(&self.target(), stop_now).await?;
        self.stop_requested = Some(kind);
        Ok(true)
    }

    /// Tell the daemon to drop what it runs and wait for a new configuration.
    pub async fn wait_new_conf(&mut self) -> Result<(), LinkError> {
        self.transport.wait_new_conf(&self.target()).await?;
        self.cfg_managed = None;
        Ok(())
    }

    pub async fn do_not_run(&self) -> Result<(), LinkError> {
        self.transport.do_not_run(&self.target()).await
    }

    /// Fetch the events the daemon buffered, returns how many arrived.
    pub async fn fetch_events(&mut self) -> Result<usize, LinkError> {
        let events = self.transport.get_events(&self.target()).await?;
        let count = events.len();
        self.events.extend(events);
        Ok(count)
    }

    pub fn drain_events(&mut self) -> Vec<DaemonEvent> {
        std::mem::take(&mut self.events)
    }

    /// Mark the daemon alive, returns whether it was considered dead.
    pub fn set_alive(&mut self) -> bool {
        let revived = !self.alive;
        self.alive = true;
        self.reachable = true;
        self.attempt = 0;
        revived
    }

    /// Mark the daemon dead, returns whether it was considered alive.
    pub fn set_dead(&mut self) -> bool {
        let died = self.alive;
        self.alive = false;
        self.reachable = false;
        self.cfg_managed = None;
        self.configuration_sent = false;
        died
    }

    /// Count a failed probe, returns whether the daemon ran out of attempts.
    pub fn record_failed_probe(&mut self) -> bool {
        self.attempt = self.attempt.saturating_add(1);
        self.attempt >= self.max_check_attempts
    }

    /// Store a new payload and its hash, returns whether the hash changed.
    pub(crate) fn install_payload(
        &mut self,
        payload: DaemonPayload,
    ) -> Result<bool, serde_json::Error> {
        let hash = payload.fingerprint()?;
        self.push_flavor = match &payload {
            DaemonPayload::Scheduler(scheduler) => Some(scheduler.part.push_flavor.clone()),
            _ => Some(hash.clone()),
        };

        let changed = self.hash.as_ref() != Some(&hash);
        if changed {
            self.configuration_sent = false;
        }

        self.hash = Some(hash);
        self.cfg = Some(payload);
        Ok(changed)
    }

    /// Merge a scheduler pointer into the satellite payload, creating the
    /// payload from `base` when the satellite has none yet.
    pub(crate) fn add_scheduler_pointer(
        &mut self,
        base: impl FnOnce() -> SatellitePayload,
        pointer: SchedulerPointer,
    ) -> Result<bool, serde_json::Error> {
        let mut payload = match self.cfg.take() {
            Some(DaemonPayload::Satellite(payload)) => payload,
            _ => base(),
        };
        payload.schedulers.insert(pointer.part_id, pointer);
        self.install_payload(DaemonPayload::Satellite(payload))
    }

    /// Drop the pointer to a part, returns whether the satellite had one.
    pub(crate) fn remove_scheduler_pointer(
        &mut self,
        part_id: PartId,
    ) -> Result<bool, serde_json::Error> {
        let Some(DaemonPayload::Satellite(mut payload)) = self.cfg.take() else {
            return Ok(false);
        };
        let removed = payload.schedulers.remove(&part_id).is_some();
        self.install_payload(DaemonPayload::Satellite(payload))?;
        Ok(removed)
    }

    /// Forget everything prepared for the daemon
    pub(crate) fn reset_configuration(&mut self) {
        self.cfg = None;
        self.cfg_to_manage = None;
        self.push_flavor = None;
        self.hash = None;
        self.configuration_sent = false;
    }

    /// Re-arm the push of the current payload
    pub(crate) fn rearm_push(&mut self) {
        self.configuration_sent = false;
    }

    /// Take over the session and the undelivered events of the link this one
    /// replaces after a reload.
    pub fn migrate_from(&mut self, old: &mut DaemonLink) {
        self.uuid = old.uuid;
        self.running_id = old.running_id.take();
        self.cfg_managed = old.cfg_managed.take();
        self.last_ping = old.last_ping;
        let mut events = old.drain_events();
        events.append(&mut self.events);
        self.events = events;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        links::mock::MockTransport,
        payload::{DaemonIdentity, GlobalSettings},
    };
    use std::collections::BTreeMap;

    fn link(transport: &MockTransport, daemon_type: DaemonType, name: &str) -> DaemonLink {
        let mut config = DaemonConfig::new(daemon_type, name, "127.0.0.1");
        config.polling_interval = 0;
        DaemonLink::new(LinkId(0), &config, RealmId(0), Arc::new(transport.clone()))
    }

    fn satellite_base(link: &DaemonLink) -> SatellitePayload {
        SatellitePayload {
            identity: DaemonIdentity {
                name: link.name().to_string(),
                daemon_type: link.daemon_type(),
                uuid: link.uuid(),
                realm: "All".to_string(),
                spare: link.spare(),
            },
            global: GlobalSettings {
                config_name: "fleet".to_string(),
                arbiter_name: "arbiter-master".to_string(),
            },
            schedulers: BTreeMap::new(),
            modules: vec![],
        }
    }

    fn pointer(part: u32) -> SchedulerPointer {
        SchedulerPointer {
            part_id: PartId(part),
            scheduler: crate::payload::DaemonRef {
                name: "scheduler-1".to_string(),
                daemon_type: DaemonType::Scheduler,
                uri: "http://127.0.0.1:7768".to_string(),
                realm: "All".to_string(),
                spare: false,
            },
            push_flavor: Fingerprint::of_bytes(&part.to_be_bytes()),
        }
    }

    #[tokio::test]
    async fn test_update_infos_is_rate_limited() {
        let transport = MockTransport::new();
        let mut config = DaemonConfig::new(DaemonType::Poller, "poller-1", "127.0.0.1");
        config.polling_interval = 60;
        let mut link = DaemonLink::new(LinkId(0), &config, RealmId(0), Arc::new(transport));

        assert_eq!(link.update_infos(false, false).await, Ok(Some(false)));
        assert_eq!(link.update_infos(false, false).await, Ok(None));
        assert_eq!(link.update_infos(true, false).await, Ok(Some(false)));
    }

    #[tokio::test]
    async fn test_push_then_confirm() {
        let transport = MockTransport::new();
        let mut link = link(&transport, DaemonType::Poller, "poller-1");
        let base = satellite_base(&link);

        link.add_scheduler_pointer(|| base, pointer(1)).unwrap();
        assert!(!link.is_confirmed());

        assert_eq!(link.push_configuration().await, Ok(true));
        assert!(link.configuration_sent());
        assert!(link.cfg_managed().is_none());

        assert_eq!(link.update_infos(true, false).await, Ok(Some(true)));
        assert!(link.is_confirmed());
    }

    #[tokio::test]
    async fn test_unreachable_daemon_propagates_error() {
        let transport = MockTransport::new();
        let mut link = link(&transport, DaemonType::Broker, "broker-1");
        transport.set_reachable(DaemonType::Broker, "broker-1", false);

        let result = link.update_infos(true, false).await;
        assert!(result.is_err_and(|e| e.is_unreachable()));
        assert!(!link.reachable());
        // liveness is the caller's decision
        assert!(link.alive());
    }

    #[tokio::test]
    async fn test_restart_clears_managed_configuration() {
        let transport = MockTransport::new();
        let mut link = link(&transport, DaemonType::Poller, "poller-1");
        let base = satellite_base(&link);
        link.add_scheduler_pointer(|| base, pointer(1)).unwrap();
        link.push_configuration().await.unwrap();
        assert_eq!(link.update_infos(true, false).await, Ok(Some(true)));

        transport.restart(DaemonType::Poller, "poller-1");

        assert_eq!(link.update_infos(true, false).await, Ok(Some(false)));
        assert!(link.cfg_managed().is_some_and(|managed| managed.is_empty()));
    }

    #[tokio::test]
    async fn test_stop_request_is_sent_once_per_kind() {
        let transport = MockTransport::new();
        let mut link = link(&transport, DaemonType::Scheduler, "scheduler-1");
        transport.ignore_graceful_stop(DaemonType::Scheduler, "scheduler-1", true);

        assert_eq!(link.stop_request(false).await, Ok(true));
        assert_eq!(link.stop_request(false).await, Ok(false));
        assert_eq!(link.stop_request(true).await, Ok(true));
        assert_eq!(link.stop_request(true).await, Ok(false));
        assert_eq!(link.stop_request(false).await, Ok(false));
    }

    #[test]
    fn test_failed_probes_until_dead() {
        let transport = MockTransport::new();
        let mut link = link(&transport, DaemonType::Reactionner, "reactionner-1");

        assert!(!link.record_failed_probe());
        assert!(!link.record_failed_probe());
        assert!(link.record_failed_probe());

        assert!(link.set_dead());
        assert!(!link.set_dead());
        assert!(link.set_alive());
        assert_eq!(link.attempt(), 0);
    }

    #[test]
    fn test_pointer_changes_hash_and_rearms_push() {
        let transport = MockTransport::new();
        let mut link = link(&transport, DaemonType::Poller, "poller-1");
        let base = satellite_base(&link);

        assert!(link.add_scheduler_pointer(|| base.clone(), pointer(1)).unwrap());
        link.configuration_sent = true;
        let first = link.hash().cloned();

        assert!(!link.add_scheduler_pointer(|| base.clone(), pointer(1)).unwrap());
        assert!(link.configuration_sent());

        assert!(link.add_scheduler_pointer(|| base.clone(), pointer(2)).unwrap());
        assert!(!link.configuration_sent());
        assert_ne!(link.hash().cloned(), first);

        assert!(link.remove_scheduler_pointer(PartId(2)).unwrap());
        assert_eq!(link.hash().cloned(), first);
    }

    #[test]
    fn test_migration_keeps_session_and_events() {
        let transport = MockTransport::new();
        let mut old = link(&transport, DaemonType::Broker, "broker-1");
        old.running_id = Some("session-1".to_string());
        old.events.push(DaemonEvent::new("log", "first"));

        let mut new = link(&transport, DaemonType::Broker, "broker-1");
        new.events.push(DaemonEvent::new("log", "second"));
        new.migrate_from(&mut old);

        assert_eq!(new.running_id(), Some("session-1"));
        assert_eq!(new.uuid(), old.uuid());
        assert!(old.pending_events().is_empty());
        let messages: Vec<_> = new.drain_events().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }
}
