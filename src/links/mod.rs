//! Daemon links
//!
//! A [`DaemonLink`] is the arbiter-side proxy of one remote daemon: its declared
//! identity, the last known liveness and the configuration it should run. All
//! remote calls go through a [`Transport`], so tests can swap the HTTP client for
//! an in-memory fleet ([`mock::MockTransport`]).

mod arena;
mod daemon_link;
pub mod mock;
mod transport;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use arena::LinkArena;
pub use daemon_link::{DaemonLink, StopKind};
pub use transport::{HttpTransport, LinkTarget, Transport, SECRET_HEADER};

/// Kind of a daemon in the fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonType {
    Arbiter,
    Scheduler,
    Poller,
    Reactionner,
    Broker,
    Receiver,
}

/// Daemon types that receive scheduler pointers
pub const SATELLITES: [DaemonType; 4] = [
    DaemonType::Poller,
    DaemonType::Reactionner,
    DaemonType::Broker,
    DaemonType::Receiver,
];

impl DaemonType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonType::Arbiter => "arbiter",
            DaemonType::Scheduler => "scheduler",
            DaemonType::Poller => "poller",
            DaemonType::Reactionner => "reactionner",
            DaemonType::Broker => "broker",
            DaemonType::Receiver => "receiver",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            DaemonType::Arbiter => 7770,
            DaemonType::Scheduler => 7768,
            DaemonType::Poller => 7771,
            DaemonType::Reactionner => 7769,
            DaemonType::Broker => 7772,
            DaemonType::Receiver => 7773,
        }
    }

    pub fn is_satellite(&self) -> bool {
        SATELLITES.contains(self)
    }
}

impl fmt::Display for DaemonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DaemonType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "arbiter" => Ok(DaemonType::Arbiter),
            "scheduler" => Ok(DaemonType::Scheduler),
            "poller" => Ok(DaemonType::Poller),
            "reactionner" => Ok(DaemonType::Reactionner),
            "broker" => Ok(DaemonType::Broker),
            "receiver" => Ok(DaemonType::Receiver),
            other => Err(format!("unknown daemon type '{other}'")),
        }
    }
}

/// Index of a link inside the [`LinkArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(pub usize);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}
