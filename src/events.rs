//! Fleet events published on a broadcast channel

use serde::{Deserialize, Serialize};

use crate::{
    DaemonEvent,
    dispatcher::DispatchState,
    links::DaemonType,
    problems::{Problem, ProblemKey},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    StateChanged {
        from: DispatchState,
        to: DispatchState,
    },
    LinkAlive {
        daemon: String,
        daemon_type: DaemonType,
    },
    LinkDead {
        daemon: String,
        daemon_type: DaemonType,
    },
    ConfigurationPushed {
        daemon: String,
        daemon_type: DaemonType,
        accepted: bool,
    },
    ProblemRaised {
        problem: Problem,
    },
    ProblemCleared {
        key: ProblemKey,
    },
    /// Event buffered by a daemon and collected by the arbiter
    Daemon {
        daemon: String,
        daemon_type: DaemonType,
        event: DaemonEvent,
    },
}
