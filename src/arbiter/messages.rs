//! Commands understood by the [`ArbiterActor`](super::ArbiterActor)

use tokio::sync::oneshot;

use crate::{
    config::FleetConfig,
    dispatcher::{DispatchState, FleetStatus},
    error::{DispatchError, OrchestrationError},
};

#[derive(Debug)]
pub enum ArbiterCommand {
    /// Run one control loop iteration right away
    ///
    /// Answers with the dispatch state reached at the end of the iteration.
    TickNow {
        respond_to: oneshot::Sender<Result<DispatchState, OrchestrationError>>,
    },

    /// Snapshot of the dispatcher
    GetStatus {
        respond_to: oneshot::Sender<FleetStatus>,
    },

    /// Replace the dispatcher by one built from a new configuration.
    ///
    /// Answers with the number of daemons carried over. On error the current
    /// dispatcher keeps running.
    Reload {
        config: Box<FleetConfig>,
        respond_to: oneshot::Sender<Result<usize, DispatchError>>,
    },

    /// Stop the fleet and the actor
    ///
    /// With `stop_now` the daemons are asked to stop immediately, otherwise
    /// they get a graceful request first and `stop_timeout` to comply.
    Shutdown { stop_now: bool },
}
