//! Dispatch rounds over a two-realm fleet

use fleet_arbiter::{
    dispatcher::DispatchState,
    links::{DaemonType, mock::MockTransport},
    part::PartId,
    payload::DaemonPayload,
    problems::ProblemKey,
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

fn managed_parts(mock: &MockTransport, daemon_type: DaemonType, name: &str) -> Vec<PartId> {
    mock.peer(daemon_type, name)
        .unwrap()
        .managed
        .keys()
        .copied()
        .collect()
}

#[tokio::test]
async fn test_every_daemon_gets_its_share() {
    let (mut dispatcher, mock) = build(&two_realm_fleet());

    assert!(dispatch_once(&mut dispatcher).await);
    assert_eq!(dispatcher.state(), DispatchState::Dispatched);
    assert!(dispatcher.problems().is_empty());

    assert_eq!(managed_parts(&mock, DaemonType::Scheduler, "scheduler-all"), vec![PartId(0)]);
    assert_eq!(managed_parts(&mock, DaemonType::Scheduler, "scheduler-eu"), vec![PartId(1)]);
    assert_eq!(
        managed_parts(&mock, DaemonType::Poller, "poller-all"),
        vec![PartId(0), PartId(1)]
    );
    assert_eq!(managed_parts(&mock, DaemonType::Poller, "poller-eu"), vec![PartId(1)]);
    assert_eq!(
        managed_parts(&mock, DaemonType::Broker, "broker-all"),
        vec![PartId(0), PartId(1)]
    );

    // probed, but nothing to run
    let spare_scheduler = mock.peer(DaemonType::Scheduler, "scheduler-eu-spare").unwrap();
    assert!(spare_scheduler.payload.is_none());
    assert_eq!(spare_scheduler.push_requests, 0);

    // the local arbiter is never contacted
    assert!(mock.peer(DaemonType::Arbiter, "arbiter-master").is_none());
}

#[tokio::test]
async fn test_spare_arbiter_receives_the_whole_configuration() {
    let config = two_realm_fleet();
    let (mut dispatcher, mock) = build(&config);

    assert!(dispatch_once(&mut dispatcher).await);

    let spare = mock.peer(DaemonType::Arbiter, "arbiter-spare").unwrap();
    let whole_conf = spare.payload.as_ref().and_then(DaemonPayload::whole_conf).unwrap();
    assert_eq!(whole_conf.daemons.len(), config.daemons.len());
    assert_eq!(whole_conf.hosts.len(), 3);
    assert_eq!(spare.do_not_run_requests, 1);
}

#[tokio::test]
async fn test_confirmed_dispatch_checks_out() {
    let (mut dispatcher, _mock) = build(&two_realm_fleet());
    assert!(dispatch_once(&mut dispatcher).await);

    assert!(dispatcher.check_reachable(false).await);
    assert!(dispatcher.all_configured());
    assert!(dispatcher.check_dispatch().unwrap());
    assert!(dispatcher.last_check_ok());
    assert_eq!(dispatcher.state(), DispatchState::Dispatched);
}

#[tokio::test]
async fn test_restarted_satellite_is_pushed_again() {
    let (mut dispatcher, mock) = build(&two_realm_fleet());
    assert!(dispatch_once(&mut dispatcher).await);
    assert!(dispatcher.check_reachable(false).await);

    mock.restart(DaemonType::Poller, "poller-eu");
    assert!(!dispatcher.check_reachable(false).await);
    assert_eq!(dispatcher.state(), DispatchState::Prepared);

    let before = mock.total_push_requests();
    assert!(dispatcher.dispatch().await.unwrap());
    assert_eq!(mock.total_push_requests(), before + 1);
    assert_eq!(mock.applied_pushes(DaemonType::Poller, "poller-eu"), 2);
    assert_eq!(dispatcher.state(), DispatchState::Dispatched);
}

#[tokio::test]
async fn test_dead_scheduler_fails_over_to_spare() {
    let (mut dispatcher, mock) = build(&two_realm_fleet());
    assert!(dispatch_once(&mut dispatcher).await);
    assert!(dispatcher.check_reachable(false).await);

    mock.set_reachable(DaemonType::Scheduler, "scheduler-eu", false);
    for _ in 0..3 {
        dispatcher.check_reachable(false).await;
    }
    assert!(!dispatcher.link(DaemonType::Scheduler, "scheduler-eu").unwrap().alive());
    assert!(dispatcher.has_problem(&ProblemKey::Dead {
        daemon: "scheduler-eu".to_string(),
        daemon_type: DaemonType::Scheduler,
    }));

    assert!(!dispatcher.check_dispatch().unwrap());
    assert_eq!(dispatcher.state(), DispatchState::Idle);

    assert!(dispatch_once(&mut dispatcher).await);
    let spare = dispatcher
        .link(DaemonType::Scheduler, "scheduler-eu-spare")
        .unwrap();
    assert_eq!(spare.cfg_to_manage(), Some(PartId(1)));
    assert_eq!(
        managed_parts(&mock, DaemonType::Scheduler, "scheduler-eu-spare"),
        vec![PartId(1)]
    );

    let poller = mock.peer(DaemonType::Poller, "poller-eu").unwrap();
    let Some(DaemonPayload::Satellite(poller)) = poller.payload else {
        panic!("poller-eu should run a satellite payload");
    };
    assert_eq!(poller.schedulers[&PartId(1)].scheduler.name, "scheduler-eu-spare");
}

#[tokio::test]
async fn test_missing_satellites_are_reported() {
    let mut config = two_realm_fleet();
    config.realms[1].must_have.poller = Some(3);
    let (mut dispatcher, mock) = build(&config);

    assert!(dispatch_once(&mut dispatcher).await);

    assert!(dispatcher.has_problem(&ProblemKey::Undercount {
        realm: "Europe".to_string(),
        daemon_type: DaemonType::Poller,
        part: PartId(1),
    }));
    // what is available still gets the part
    assert_eq!(managed_parts(&mock, DaemonType::Poller, "poller-eu"), vec![PartId(1)]);
}

#[tokio::test]
async fn test_realm_without_scheduler_leaves_its_part_unassigned() {
    let mut config = two_realm_fleet();
    config
        .daemons
        .retain(|d| d.daemon_type != DaemonType::Scheduler || d.name == "scheduler-all");
    let (mut dispatcher, mock) = build(&config);

    // the part count follows the schedulers: Europe keeps one unassigned part
    assert!(dispatch_once(&mut dispatcher).await);
    assert!(dispatcher.has_problem(&ProblemKey::UnassignedPart {
        realm: "Europe".to_string(),
        part: PartId(1),
    }));
    assert_eq!(managed_parts(&mock, DaemonType::Poller, "poller-eu"), Vec::<PartId>::new());
    assert_eq!(managed_parts(&mock, DaemonType::Poller, "poller-all"), vec![PartId(0)]);
}
