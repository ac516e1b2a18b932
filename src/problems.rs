//! Operational problems
//!
//! Shortfalls the dispatcher recovers from (unreachable daemons, unassigned
//! parts, satellite undercount, rejected pushes) are kept here until resolved so
//! operators can query them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{links::DaemonType, part::PartId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProblemKey {
    Unreachable {
        daemon: String,
        daemon_type: DaemonType,
    },
    Dead {
        daemon: String,
        daemon_type: DaemonType,
    },
    PushFailed {
        daemon: String,
        daemon_type: DaemonType,
    },
    NotConfigured {
        daemon: String,
        daemon_type: DaemonType,
    },
    UnassignedPart {
        realm: String,
        part: PartId,
    },
    Undercount {
        realm: String,
        daemon_type: DaemonType,
        part: PartId,
    },
}

impl ProblemKey {
    /// Name of the daemon the problem is about, if any
    pub fn daemon(&self) -> Option<(DaemonType, &str)> {
        match self {
            ProblemKey::Unreachable {
                daemon,
                daemon_type,
            }
            | ProblemKey::Dead {
                daemon,
                daemon_type,
            }
            | ProblemKey::PushFailed {
                daemon,
                daemon_type,
            }
            | ProblemKey::NotConfigured {
                daemon,
                daemon_type,
            } => Some((*daemon_type, daemon.as_str())),
            ProblemKey::UnassignedPart { .. } | ProblemKey::Undercount { .. } => None,
        }
    }
}

impl fmt::Display for ProblemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProblemKey::Unreachable {
                daemon,
                daemon_type,
            } => write!(f, "{daemon_type} '{daemon}' is unreachable"),
            ProblemKey::Dead {
                daemon,
                daemon_type,
            } => write!(f, "{daemon_type} '{daemon}' is dead"),
            ProblemKey::PushFailed {
                daemon,
                daemon_type,
            } => write!(f, "configuration push to {daemon_type} '{daemon}' failed"),
            ProblemKey::NotConfigured {
                daemon,
                daemon_type,
            } => write!(f, "{daemon_type} '{daemon}' is not configured"),
            ProblemKey::UnassignedPart { realm, part } => {
                write!(f, "part {part} of realm '{realm}' has no scheduler")
            }
            ProblemKey::Undercount {
                realm,
                daemon_type,
                part,
            } => write!(f, "part {part} of realm '{realm}' lacks {daemon_type}s"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub key: ProblemKey,
    pub message: String,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct Problems {
    problems: BTreeMap<ProblemKey, Problem>,
}

impl Problems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a problem, returns whether it was not already known.
    ///
    /// A known problem keeps its `since` and takes the new message.
    pub fn raise(&mut self, key: ProblemKey, message: impl Into<String>) -> bool {
        let message = message.into();
        match self.problems.get_mut(&key) {
            Some(problem) => {
                problem.message = message;
                false
            }
            None => {
                self.problems.insert(
                    key.clone(),
                    Problem {
                        key,
                        message,
                        since: Utc::now(),
                    },
                );
                true
            }
        }
    }

    /// Resolve a problem, returns whether it was known.
    pub fn clear(&mut self, key: &ProblemKey) -> bool {
        self.problems.remove(key).is_some()
    }

    /// Resolve every problem matching `predicate`, returning the resolved keys
    pub fn clear_where(&mut self, predicate: impl Fn(&ProblemKey) -> bool) -> Vec<ProblemKey> {
        let keys: Vec<_> = self
            .problems
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();
        for key in &keys {
            self.problems.remove(key);
        }
        keys
    }

    pub fn contains(&self, key: &ProblemKey) -> bool {
        self.problems.contains_key(key)
    }

    pub fn list(&self) -> Vec<Problem> {
        self.problems.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.problems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.problems.is_empty()
    }
}
