use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Where the dispatcher stands in the prepare / push / verify cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    /// Nothing prepared (initial state, or an audit invalidated the assignment)
    #[default]
    Idle,
    /// Payloads are computed and waiting to be pushed
    Prepared,
    /// Every attempted push succeeded
    Dispatched,
}

impl DispatchState {
    pub fn new_to_dispatch(self) -> bool {
        self == DispatchState::Prepared
    }

    pub fn first_dispatch_done(self) -> bool {
        self == DispatchState::Dispatched
    }

    /// State after a `prepare_dispatch`
    pub fn prepare(self) -> Result<Self, ProtocolError> {
        match self {
            DispatchState::Prepared => Err(ProtocolError::AlreadyPrepared),
            DispatchState::Idle | DispatchState::Dispatched => Ok(DispatchState::Prepared),
        }
    }

    /// Fails unless a prepared configuration waits for its push
    pub fn ensure_dispatchable(self) -> Result<(), ProtocolError> {
        match self {
            DispatchState::Idle => Err(ProtocolError::NothingPrepared),
            DispatchState::Dispatched => Err(ProtocolError::AlreadyDispatched),
            DispatchState::Prepared => Ok(()),
        }
    }

    /// A confirmed daemon lost its configuration: push again
    pub fn drift(self) -> Self {
        match self {
            DispatchState::Dispatched => DispatchState::Prepared,
            other => other,
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchState::Idle => "idle",
            DispatchState::Prepared => "prepared",
            DispatchState::Dispatched => "dispatched",
        };
        f.write_str(name)
    }
}
