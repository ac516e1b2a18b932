use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::links::DaemonType;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub arbiter: ArbiterSettings,

    /// Realm tree (an implicit default realm "All" is created when empty)
    #[serde(default)]
    pub realms: Vec<RealmConfig>,

    pub daemons: Vec<DaemonConfig>,

    #[serde(default)]
    pub hosts: Vec<HostConfig>,

    /// Status API (optional - disabled when absent)
    pub api: Option<ApiSettings>,
}

/// Settings of the local arbiter and its control loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterSettings {
    /// Name of the arbiter daemon entry this process runs as
    #[serde(default = "default_arbiter_name")]
    pub name: String,

    #[serde(default = "default_config_name")]
    pub config_name: String,

    /// Seconds between two control loop ticks
    #[serde(default = "default_loop_interval")]
    pub loop_interval: u64,

    /// Attempts of a configuration dispatch before giving up
    #[serde(default = "default_dispatch_retries")]
    pub dispatch_retries: u32,

    /// Seconds to wait between two dispatch attempts, per locally launched daemon
    #[serde(default = "default_dispatch_retry_pause")]
    pub dispatch_retry_pause: u64,

    /// Seconds to wait for daemons to stop before forcing them
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout: u64,

    /// Minimum seconds between two launches of the same local daemon
    #[serde(default = "default_respawn_pause")]
    pub respawn_pause: u64,

    /// Maximum number of daemons probed at the same time
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        Self {
            name: default_arbiter_name(),
            config_name: default_config_name(),
            loop_interval: default_loop_interval(),
            dispatch_retries: default_dispatch_retries(),
            dispatch_retry_pause: default_dispatch_retry_pause(),
            stop_timeout: default_stop_timeout(),
            respawn_pause: default_respawn_pause(),
            probe_concurrency: default_probe_concurrency(),
        }
    }
}

impl ArbiterSettings {
    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs(self.loop_interval.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout)
    }

    pub fn respawn_pause(&self) -> Duration {
        Duration::from_secs(self.respawn_pause)
    }
}

fn default_arbiter_name() -> String {
    String::from("arbiter-master")
}

fn default_config_name() -> String {
    String::from("fleet")
}

fn default_loop_interval() -> u64 {
    1
}

fn default_dispatch_retries() -> u32 {
    3
}

fn default_dispatch_retry_pause() -> u64 {
    1
}

fn default_stop_timeout() -> u64 {
    30
}

fn default_respawn_pause() -> u64 {
    5
}

fn default_probe_concurrency() -> usize {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealmConfig {
    pub name: String,

    /// The catch-all realm for hosts and daemons without a realm
    #[serde(default)]
    pub default: bool,

    /// Names of the immediate sub-realms
    #[serde(default)]
    pub members: Vec<String>,

    #[serde(default)]
    pub must_have: MustHave,
}

/// Per-type override of the number of satellites a realm needs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MustHave {
    pub poller: Option<usize>,
    pub reactionner: Option<usize>,
    pub broker: Option<usize>,
    pub receiver: Option<usize>,
}

impl MustHave {
    pub fn get(&self, daemon_type: DaemonType) -> Option<usize> {
        match daemon_type {
            DaemonType::Poller => self.poller,
            DaemonType::Reactionner => self.reactionner,
            DaemonType::Broker => self.broker,
            DaemonType::Receiver => self.receiver,
            DaemonType::Arbiter | DaemonType::Scheduler => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(rename = "type")]
    pub daemon_type: DaemonType,

    pub name: String,

    pub address: String,

    /// Defaults to the well-known port of the daemon type
    pub port: Option<u16>,

    /// Realm the daemon is declared in (default realm when absent)
    pub realm: Option<String>,

    #[serde(default)]
    pub spare: bool,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default = "default_true")]
    pub manage_sub_realms: bool,

    #[serde(default)]
    pub manage_arbiters: bool,

    #[serde(default)]
    pub modules: Vec<String>,

    /// Secret sent in the `X-MONITORING-SECRET` header
    pub token: Option<String>,

    /// Set when the arbiter launches this daemon itself
    pub launch: Option<LaunchSpec>,

    /// Minimum seconds between two status polls
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,

    /// Seconds before an RPC call is considered failed
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Failed polls before the daemon is declared dead
    #[serde(default = "default_max_check_attempts")]
    pub max_check_attempts: u32,
}

impl DaemonConfig {
    pub fn new(daemon_type: DaemonType, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            daemon_type,
            name: name.into(),
            address: address.into(),
            port: None,
            realm: None,
            spare: false,
            active: true,
            manage_sub_realms: true,
            manage_arbiters: false,
            modules: Vec::new(),
            token: None,
            launch: None,
            polling_interval: default_polling_interval(),
            timeout: default_timeout(),
            max_check_attempts: default_max_check_attempts(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.daemon_type.default_port())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub name: String,
    pub address: Option<String>,
    pub realm: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    pub bind: SocketAddr,
    pub token: Option<String>,
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

fn default_true() -> bool {
    true
}

fn default_polling_interval() -> u64 {
    1
}

fn default_timeout() -> u64 {
    3
}

fn default_max_check_attempts() -> u32 {
    3
}

pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<FleetConfig> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;
    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {}", path.display()))
        .inspect(|config: &FleetConfig| trace!("loaded config: {config:?}"))
}
