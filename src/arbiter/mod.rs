//! Arbiter orchestration loop
//!
//! The [`ArbiterActor`] owns the [`Dispatcher`](crate::dispatcher::Dispatcher)
//! of the running configuration generation and drives it from a single task:
//! nothing else ever mutates the dispatcher. Everything else talks to it through
//! an [`ArbiterHandle`].

mod actor;
pub mod messages;
mod supervisor;

pub use actor::{ArbiterActor, ArbiterHandle};
pub use messages::ArbiterCommand;
pub use supervisor::{ProcessSupervisor, TokioProcessSupervisor};
