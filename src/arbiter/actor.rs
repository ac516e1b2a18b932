//! ArbiterActor - Drives the dispatcher of the current configuration
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → supervise local daemons → collect events → check_reachable
//!     ↑            → Idle: prepare + dispatch (bounded retries)
//!     │            → Prepared: dispatch (bounded retries)
//!     │            → Dispatched: check_dispatch + check_bad_dispatch
//!     └─── Commands (TickNow, GetStatus, Reload, Shutdown)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
    config::{ArbiterSettings, FleetConfig},
    dispatcher::{DispatchState, Dispatcher, FleetStatus},
    error::{DispatchError, OrchestrationError},
    events::FleetEvent,
    links::{DaemonType, LinkId, Transport},
    loader::build_dispatcher,
    problems::Problem,
};

use super::{messages::ArbiterCommand, supervisor::ProcessSupervisor};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Actor owning the [`Dispatcher`] of the current configuration generation
pub struct ArbiterActor {
    dispatcher: Dispatcher,
    settings: ArbiterSettings,
    transport: Arc<dyn Transport>,
    supervisor: Arc<dyn ProcessSupervisor>,
    command_rx: mpsc::Receiver<ArbiterCommand>,
    event_tx: broadcast::Sender<FleetEvent>,
    last_launch: HashMap<(DaemonType, String), Instant>,
}

impl ArbiterActor {
    pub fn new(
        dispatcher: Dispatcher,
        transport: Arc<dyn Transport>,
        supervisor: Arc<dyn ProcessSupervisor>,
        command_rx: mpsc::Receiver<ArbiterCommand>,
        event_tx: broadcast::Sender<FleetEvent>,
    ) -> Self {
        let settings = dispatcher.whole_conf().arbiter.clone();
        Self {
            dispatcher: dispatcher.with_event_sender(event_tx.clone()),
            settings,
            transport,
            supervisor,
            command_rx,
            event_tx,
            last_launch: HashMap::new(),
        }
    }

    /// Run the control loop until shutdown.
    ///
    /// Fails when the configuration could never be dispatched; the fleet is
    /// asked to stop before returning in that case.
    #[instrument(skip(self), fields(arbiter = %self.settings.name))]
    pub async fn run(mut self) -> Result<(), OrchestrationError> {
        info!("starting arbiter");

        let mut ticker = self.ticker();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("{e}");
                        self.shutdown(true).await;
                        return Err(e);
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        ArbiterCommand::TickNow { respond_to } => {
                            debug!("received TickNow command");
                            let result = self.tick().await;
                            if let Err(e) = &result {
                                error!("{e}");
                                let e = e.clone();
                                let _ = respond_to.send(result);
                                self.shutdown(true).await;
                                return Err(e);
                            }
                            let _ = respond_to.send(result);
                        }

                        ArbiterCommand::GetStatus { respond_to } => {
                            let _ = respond_to.send(self.dispatcher.status());
                        }

                        ArbiterCommand::Reload { config, respond_to } => {
                            let result = self.reload(*config);
                            if result.is_ok() {
                                ticker = self.ticker();
                            }
                            let _ = respond_to.send(result);
                        }

                        ArbiterCommand::Shutdown { stop_now } => {
                            debug!("received shutdown command");
                            self.shutdown(stop_now).await;
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        info!("arbiter stopped");
        Ok(())
    }

    fn ticker(&self) -> tokio::time::Interval {
        let period = self.settings.loop_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// One control loop iteration
    async fn tick(&mut self) -> Result<DispatchState, OrchestrationError> {
        self.supervise_local_daemons().await;

        if self.dispatcher.collect_events().await > 0 {
            self.dispatcher.publish_events();
        }

        self.dispatcher.check_reachable(false).await;

        match self.dispatcher.state() {
            DispatchState::Idle => {
                self.dispatcher.prepare_dispatch()?;
                self.dispatch_with_retries().await?;
            }
            DispatchState::Prepared => self.dispatch_with_retries().await?,
            DispatchState::Dispatched => {
                if self.dispatcher.all_configured() {
                    self.dispatcher.check_dispatch()?;
                    self.dispatcher.check_bad_dispatch().await;
                } else {
                    trace!("waiting for every daemon to confirm its configuration");
                }
            }
        }

        Ok(self.dispatcher.state())
    }

    /// Push the prepared configuration, retrying a bounded number of times.
    ///
    /// Running out of attempts is fatal only while the configuration has never
    /// been dispatched; later on the next tick simply tries again.
    async fn dispatch_with_retries(&mut self) -> Result<(), OrchestrationError> {
        let attempts = self.settings.dispatch_retries.max(1);

        for attempt in 1..=attempts {
            self.dispatcher.check_reachable(true).await;
            if self.dispatcher.dispatch().await? {
                return Ok(());
            }

            warn!("dispatch attempt {attempt}/{attempts} did not complete");
            if attempt < attempts {
                sleep(self.retry_pause()).await;
            }
        }

        if self.dispatcher.ever_dispatched() {
            warn!("configuration is still not fully dispatched, trying again next tick");
            Ok(())
        } else {
            Err(OrchestrationError::DispatchFailed { attempts })
        }
    }

    /// Pause between two dispatch attempts, longer when we launch daemons ourselves
    fn retry_pause(&self) -> Duration {
        let local = self
            .dispatcher
            .links()
            .iter()
            .filter(|link| link.is_local())
            .count()
            .max(1);
        Duration::from_secs(self.settings.dispatch_retry_pause) * local as u32
    }

    /// Restart locally launched daemons whose process died
    async fn supervise_local_daemons(&mut self) {
        let respawn_pause = self.settings.respawn_pause();
        let arbiter_link = self.dispatcher.arbiter_link();

        let local: Vec<LinkId> = self
            .dispatcher
            .links()
            .iter()
            .filter(|link| link.is_local() && link.active() && link.id() != arbiter_link)
            .map(|link| link.id())
            .collect();

        for id in local {
            let link = &self.dispatcher.links()[id];
            if self.supervisor.is_running(link).await {
                continue;
            }

            let key = (link.daemon_type(), link.name().to_string());
            if let Some(last) = self.last_launch.get(&key)
                && last.elapsed() < respawn_pause
            {
                trace!("{} '{}' was launched recently, waiting", key.0, key.1);
                continue;
            }

            match self.supervisor.start(link).await {
                Ok(()) => debug!("{} '{}' started", key.0, key.1),
                Err(e) => error!("failed to start {} '{}': {e:#}", key.0, key.1),
            }
            self.last_launch.insert(key, Instant::now());
        }
    }

    /// Swap in the dispatcher of a new configuration generation
    fn reload(&mut self, config: FleetConfig) -> Result<usize, DispatchError> {
        info!("reloading configuration");

        let mut next = build_dispatcher(&config, self.transport.clone())
            .inspect_err(|e| error!("new configuration rejected, keeping the current one: {e}"))?
            .with_event_sender(self.event_tx.clone());
        let matched = next.inherit_from(&mut self.dispatcher);

        self.dispatcher = next;
        self.settings = config.arbiter;
        Ok(matched)
    }

    /// Stop every peer, then the processes we launched
    async fn shutdown(&mut self, stop_now: bool) {
        info!("stopping the fleet (immediate: {stop_now})");

        let mut force = stop_now;
        if !stop_now {
            self.dispatcher.stop_request(false).await;

            let deadline = Instant::now() + self.settings.stop_timeout();
            loop {
                let running = self.dispatcher.count_running_peers().await;
                if running == 0 {
                    break;
                }
                if Instant::now() >= deadline {
                    warn!("{running} daemon(s) still running after the stop timeout");
                    force = true;
                    break;
                }
                sleep(Duration::from_secs(1)).await;
            }
        }

        if force && !self.dispatcher.stop_request(true).await {
            warn!("some daemons could not be asked to stop");
        }

        self.supervisor.kill_all().await;
    }
}

/// Handle for controlling an [`ArbiterActor`]
///
/// Can be cloned and shared across tasks.
#[derive(Clone)]
pub struct ArbiterHandle {
    sender: mpsc::Sender<ArbiterCommand>,
    event_tx: broadcast::Sender<FleetEvent>,
}

impl ArbiterHandle {
    /// Spawn the actor. The join handle resolves when the actor stops.
    pub fn spawn(
        dispatcher: Dispatcher,
        transport: Arc<dyn Transport>,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> (Self, JoinHandle<Result<(), OrchestrationError>>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let actor = ArbiterActor::new(dispatcher, transport, supervisor, cmd_rx, event_tx.clone());
        let join = tokio::spawn(actor.run());

        (
            Self {
                sender: cmd_tx,
                event_tx,
            },
            join,
        )
    }

    /// Fleet events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.event_tx.subscribe()
    }

    /// Run one control loop iteration right away
    pub async fn tick_now(&self) -> Result<DispatchState> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ArbiterCommand::TickNow { respond_to: tx })
            .await
            .context("failed to send TickNow command")?;

        Ok(rx.await.context("failed to receive response")??)
    }

    pub async fn status(&self) -> Result<FleetStatus> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ArbiterCommand::GetStatus { respond_to: tx })
            .await
            .context("failed to send GetStatus command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn problems(&self) -> Result<Vec<Problem>> {
        Ok(self.status().await?.problems)
    }

    /// Replace the running configuration, returns how many daemons were carried over
    pub async fn reload(&self, config: FleetConfig) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ArbiterCommand::Reload {
                config: Box::new(config),
                respond_to: tx,
            })
            .await
            .context("failed to send Reload command")?;

        Ok(rx.await.context("failed to receive response")??)
    }

    /// Ask the actor to stop the fleet and exit
    pub async fn shutdown(&self, stop_now: bool) -> Result<()> {
        self.sender
            .send(ArbiterCommand::Shutdown { stop_now })
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
