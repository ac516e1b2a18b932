//! API response types

use serde::{Deserialize, Serialize};

use crate::{
    dispatcher::{DaemonStatus, DispatchState, FleetStatus},
    problems::Problem,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub started_at: String,
}

/// Dispatch state with fleet-wide counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub state: DispatchState,
    pub dispatch_ok: bool,
    pub last_check_ok: bool,
    pub ever_dispatched: bool,
    pub daemons: usize,
    pub alive: usize,
    pub configured: usize,
    pub parts: usize,
    pub assigned_parts: usize,
    pub problems: usize,
}

impl From<&FleetStatus> for DispatchSummary {
    fn from(status: &FleetStatus) -> Self {
        Self {
            state: status.state,
            dispatch_ok: status.dispatch_ok,
            last_check_ok: status.last_check_ok,
            ever_dispatched: status.ever_dispatched,
            daemons: status.daemons.len(),
            alive: status.daemons.iter().filter(|d| d.alive).count(),
            configured: status.daemons.iter().filter(|d| d.confirmed).count(),
            parts: status.parts.len(),
            assigned_parts: status.parts.iter().filter(|p| p.scheduler.is_some()).count(),
            problems: status.problems.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonsResponse {
    pub daemons: Vec<DaemonStatus>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemsResponse {
    pub problems: Vec<Problem>,
    pub total: usize,
}
