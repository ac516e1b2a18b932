use std::net::Ipv4Addr;

use crate::links::DaemonType;

const SATELLITE_TYPE: &str = "SATELLITE_TYPE";

const DEFAULT_TYPE: DaemonType = DaemonType::Poller;

pub fn get_daemon_type() -> DaemonType {
    let type_from_env = std::env::var(SATELLITE_TYPE);
    type_from_env.map_or(DEFAULT_TYPE, |res| res.parse().unwrap_or(DEFAULT_TYPE))
}

const SATELLITE_PORT: &str = "SATELLITE_PORT";

/// Port from the environment, or the well-known port of the daemon type
pub fn get_port(daemon_type: DaemonType) -> u16 {
    let default_port = daemon_type.default_port();
    let port_from_env = std::env::var(SATELLITE_PORT);
    port_from_env.map_or(default_port, |res| res.parse().unwrap_or(default_port))
}

const SATELLITE_ADDR: &str = "SATELLITE_ADDR";

const DEFAULT_ADDR: Ipv4Addr = Ipv4Addr::new(0, 0, 0, 0);

pub fn get_addr() -> Ipv4Addr {
    let addr_from_env = std::env::var(SATELLITE_ADDR);
    addr_from_env.map_or(DEFAULT_ADDR, |res| res.parse().unwrap_or(DEFAULT_ADDR))
}

const SATELLITE_SECRET: &str = "SATELLITE_SECRET";

pub fn get_secret() -> Option<String> {
    let secret_from_env = std::env::var(SATELLITE_SECRET);
    secret_from_env.ok()
}
