//! Error types for dispatch and daemon links
//!
//! Two families are kept apart on purpose:
//!
//! - [`DispatchError`]: configuration the arbiter must never run with
//!   ([`ConstructionError`]) or a call made out of sequence ([`ProtocolError`]).
//!   These cross component boundaries and end the calling code path.
//! - [`LinkError`]: a single daemon could not be reached or answered badly.
//!   It degrades that daemon for the current round and is retried later.

use thiserror::Error;

use crate::links::DaemonType;

/// Result type alias for dispatcher operations
pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("failed to serialize configuration payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Configuration that can not be dispatched at all
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    #[error("no arbiter named '{0}' is declared")]
    MissingArbiter(String),

    #[error("arbiter '{name}' can not dispatch: {reason}")]
    InvalidArbiter { name: String, reason: String },

    #[error("two master arbiters are declared: '{first}' and '{second}'")]
    TwoMasterArbiters { first: String, second: String },

    #[error("{daemon_type} '{name}' is declared more than once")]
    DuplicateDaemon { daemon_type: DaemonType, name: String },

    #[error("realm '{0}' is declared more than once")]
    DuplicateRealm(String),

    #[error("host '{0}' is declared more than once")]
    DuplicateHost(String),

    #[error("unknown realm '{0}'")]
    UnknownRealm(String),

    #[error("invalid realm tree: {0}")]
    InvalidRealmTree(String),
}

/// A dispatcher operation was called in the wrong state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("a configuration is already prepared and waiting to be dispatched")]
    AlreadyPrepared,

    #[error("no configuration has been prepared")]
    NothingPrepared,

    #[error("the prepared configuration was already dispatched")]
    AlreadyDispatched,

    #[error("no configuration has ever been dispatched")]
    NeverDispatched,
}

/// Failure of a single RPC round-trip with a daemon
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Connection refused, timed out or dropped
    #[error("daemon unreachable: {0}")]
    Unreachable(String),

    /// The daemon answered with an error status
    #[error("daemon answered with status {status}: {message}")]
    Application { status: u16, message: String },

    /// The daemon answered something we could not decode
    #[error("invalid answer from daemon: {0}")]
    Decode(String),
}

impl LinkError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, LinkError::Unreachable(_))
    }
}

/// Failure of the arbiter control loop itself
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestrationError {
    #[error("configuration dispatch failed after {attempts} attempts")]
    DispatchFailed { attempts: u32 },

    #[error("dispatcher failure: {0}")]
    Dispatcher(String),
}

impl From<DispatchError> for OrchestrationError {
    fn from(err: DispatchError) -> Self {
        OrchestrationError::Dispatcher(err.to_string())
    }
}
