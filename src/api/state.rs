//! API shared state

use chrono::{DateTime, Utc};

use crate::arbiter::ArbiterHandle;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub arbiter: ArbiterHandle,

    /// When the API was started, reported by the health check
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(arbiter: ArbiterHandle) -> Self {
        Self {
            arbiter,
            started_at: Utc::now(),
        }
    }
}
