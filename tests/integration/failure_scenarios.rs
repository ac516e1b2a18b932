//! Failure handling of the dispatcher and the arbiter loop
//!
//! These tests verify that the fleet recovers from:
//! - Rejected configuration pushes
//! - Daemons unreachable during the first dispatch
//! - Daemons that die for good
//!
//! A fleet that can not be configured at all stops the arbiter.

use std::sync::Arc;

use assert_matches::assert_matches;
use fleet_arbiter::{
    arbiter::{ArbiterHandle, TokioProcessSupervisor},
    dispatcher::DispatchState,
    error::OrchestrationError,
    events::FleetEvent,
    links::{DaemonType, Transport, mock::MockTransport},
    loader::build_dispatcher,
    problems::ProblemKey,
};
use tokio::{sync::broadcast, task::JoinHandle};

use crate::helpers::*;

fn spawn_arbiter(mock: &MockTransport) -> (ArbiterHandle, JoinHandle<Result<(), OrchestrationError>>) {
    let transport: Arc<dyn Transport> = Arc::new(mock.clone());
    let dispatcher = build_dispatcher(&two_realm_fleet(), transport.clone()).unwrap();
    ArbiterHandle::spawn(dispatcher, transport, Arc::new(TokioProcessSupervisor::new()))
}

fn drain(events: &mut broadcast::Receiver<FleetEvent>) -> Vec<FleetEvent> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}

#[tokio::test]
async fn test_rejected_push_is_retried() {
    let (mut dispatcher, mock) = build(&two_realm_fleet());
    mock.reject_pushes(DaemonType::Broker, "broker-all", true);

    assert!(!dispatch_once(&mut dispatcher).await);
    assert_eq!(dispatcher.state(), DispatchState::Prepared);
    assert!(!dispatcher.ever_dispatched());
    let push_failed = ProblemKey::PushFailed {
        daemon: "broker-all".to_string(),
        daemon_type: DaemonType::Broker,
    };
    assert!(dispatcher.has_problem(&push_failed));

    mock.reject_pushes(DaemonType::Broker, "broker-all", false);
    assert!(dispatcher.dispatch().await.unwrap());
    assert_eq!(dispatcher.state(), DispatchState::Dispatched);
    assert!(!dispatcher.has_problem(&push_failed));
    assert_eq!(mock.applied_pushes(DaemonType::Broker, "broker-all"), 1);
}

#[tokio::test]
async fn test_satellite_missed_by_the_first_dispatch_is_configured_later() {
    let (mut dispatcher, mock) = build(&two_realm_fleet());
    mock.set_reachable(DaemonType::Poller, "poller-eu", false);

    assert!(!dispatch_once(&mut dispatcher).await);
    assert_eq!(dispatcher.state(), DispatchState::Prepared);
    assert!(!dispatcher.ever_dispatched());
    assert!(dispatcher.has_problem(&ProblemKey::Unreachable {
        daemon: "poller-eu".to_string(),
        daemon_type: DaemonType::Poller,
    }));
    assert_eq!(mock.applied_pushes(DaemonType::Poller, "poller-eu"), 0);

    mock.set_reachable(DaemonType::Poller, "poller-eu", true);
    dispatcher.check_reachable(true).await;
    assert!(dispatcher.dispatch().await.unwrap());
    assert_eq!(dispatcher.state(), DispatchState::Dispatched);
    assert_eq!(mock.applied_pushes(DaemonType::Poller, "poller-eu"), 1);
    assert_eq!(mock.applied_pushes(DaemonType::Broker, "broker-all"), 1);

    assert!(dispatcher.check_reachable(false).await);
    assert!(dispatcher.problems().is_empty());
}

#[tokio::test]
async fn test_unreachable_fleet_at_startup_is_fatal() {
    let mock = MockTransport::new();
    for daemon in two_realm_fleet().daemons {
        if daemon.name != "arbiter-master" {
            mock.set_reachable(daemon.daemon_type, &daemon.name, false);
        }
    }
    let (arbiter, join) = spawn_arbiter(&mock);

    assert!(arbiter.tick_now().await.is_err());
    assert_matches!(
        join.await.unwrap(),
        Err(OrchestrationError::DispatchFailed { attempts: 3 })
    );
    assert_eq!(mock.total_push_requests(), 0);
}

#[tokio::test]
async fn test_dead_daemon_is_announced() {
    let mock = MockTransport::new();
    let (arbiter, _join) = spawn_arbiter(&mock);
    let mut events = arbiter.subscribe();

    arbiter.tick_now().await.unwrap();
    mock.set_reachable(DaemonType::Broker, "broker-all", false);
    for _ in 0..3 {
        arbiter.tick_now().await.unwrap();
    }

    let received = drain(&mut events);
    assert!(received.iter().any(|event| matches!(
        event,
        FleetEvent::LinkDead { daemon, daemon_type: DaemonType::Broker } if daemon == "broker-all"
    )));

    mock.set_reachable(DaemonType::Broker, "broker-all", true);
    arbiter.tick_now().await.unwrap();

    let received = drain(&mut events);
    assert!(received.iter().any(|event| matches!(
        event,
        FleetEvent::LinkAlive { daemon, .. } if daemon == "broker-all"
    )));

    arbiter.shutdown(true).await.unwrap();
}

#[tokio::test]
async fn test_immediate_shutdown_skips_stopped_daemons() {
    let mock = MockTransport::new();
    let (arbiter, join) = spawn_arbiter(&mock);
    arbiter.tick_now().await.unwrap();

    mock.set_reachable(DaemonType::Poller, "poller-all", false);
    arbiter.tick_now().await.unwrap();

    arbiter.shutdown(true).await.unwrap();
    join.await.unwrap().unwrap();

    let broker = mock.peer(DaemonType::Broker, "broker-all").unwrap();
    assert_eq!(broker.stop_requests, vec![true]);
    let poller = mock.peer(DaemonType::Poller, "poller-all").unwrap();
    assert!(poller.stop_requests.is_empty());
}
