//! The arbiter loop driving daemons over HTTP

use std::sync::Arc;

use fleet_arbiter::{
    PushRequest,
    arbiter::{ArbiterHandle, TokioProcessSupervisor},
    config::FleetConfig,
    dispatcher::DispatchState,
    error::OrchestrationError,
    links::{DaemonType, HttpTransport, SECRET_HEADER, Transport},
    loader::build_dispatcher,
    part::PartId,
    payload::DaemonPayload,
    satellite::SatelliteState,
};
use tokio::task::JoinHandle;
use tokio_test::assert_ok;
use wiremock::MockServer;

use crate::helpers::*;

async fn pushes_to(server: &MockServer) -> Vec<(Option<String>, PushRequest)> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == "/push_configuration")
        .map(|request| {
            let secret = request
                .headers
                .get(SECRET_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            (secret, request.body_json::<PushRequest>().unwrap())
        })
        .collect()
}

fn http_fleet(scheduler: &MockServer, poller: &MockServer) -> FleetConfig {
    let mut scheduler_config = served_by(daemon(DaemonType::Scheduler, "scheduler-1"), scheduler);
    scheduler_config.token = Some("fleet-secret".to_string());

    FleetConfig {
        arbiter: quiet_settings(),
        realms: vec![realm("All", true, &[])],
        daemons: vec![
            daemon(DaemonType::Arbiter, "arbiter-master"),
            scheduler_config,
            served_by(daemon(DaemonType::Poller, "poller-1"), poller),
        ],
        hosts: vec![host("web-1", "All"), host("db-1", "All")],
        api: None,
    }
}

fn spawn_over_http(config: &FleetConfig) -> (ArbiterHandle, JoinHandle<Result<(), OrchestrationError>>) {
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new().unwrap());
    let dispatcher = build_dispatcher(config, transport.clone()).unwrap();
    ArbiterHandle::spawn(dispatcher, transport, Arc::new(TokioProcessSupervisor::new()))
}

#[tokio::test]
async fn test_first_tick_pushes_over_http() {
    let scheduler = satellite_server("scheduler-session").await;
    let poller = satellite_server("poller-session").await;
    let (arbiter, join) = spawn_over_http(&http_fleet(&scheduler, &poller));

    let state = assert_ok!(arbiter.tick_now().await);
    assert_eq!(state, DispatchState::Dispatched);

    let scheduler_pushes = pushes_to(&scheduler).await;
    assert_eq!(scheduler_pushes.len(), 1);
    let (secret, request) = &scheduler_pushes[0];
    assert_eq!(secret.as_deref(), Some("fleet-secret"));
    assert_eq!(request.payload.fingerprint().unwrap(), request.hash);
    let DaemonPayload::Scheduler(payload) = &request.payload else {
        panic!("scheduler-1 should receive a scheduler payload");
    };
    assert_eq!(payload.part.hosts.len(), 2);
    assert_eq!(payload.satellites.len(), 1);

    let poller_pushes = pushes_to(&poller).await;
    assert_eq!(poller_pushes.len(), 1);
    let (secret, request) = &poller_pushes[0];
    assert_eq!(secret, &None);
    let DaemonPayload::Satellite(payload) = &request.payload else {
        panic!("poller-1 should receive a satellite payload");
    };
    assert_eq!(payload.schedulers.len(), 1);
    assert!(
        payload
            .schedulers
            .values()
            .all(|pointer| pointer.scheduler.name == "scheduler-1")
    );

    assert_ok!(arbiter.shutdown(true).await);
    assert_ok!(join.await.unwrap());
}

#[tokio::test]
async fn test_pushed_configurations_are_taken_by_the_daemons() {
    let scheduler = satellite_server("scheduler-session").await;
    let poller = satellite_server("poller-session").await;
    let (arbiter, join) = spawn_over_http(&http_fleet(&scheduler, &poller));

    assert_eq!(assert_ok!(arbiter.tick_now().await), DispatchState::Dispatched);

    for (server, daemon_type) in [
        (&scheduler, DaemonType::Scheduler),
        (&poller, DaemonType::Poller),
    ] {
        let bodies: Vec<Vec<u8>> = server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| request.url.path() == "/push_configuration")
            .map(|request| request.body)
            .collect();
        assert_eq!(bodies.len(), 1, "one push for the {daemon_type}");

        let receiver = SatelliteState::new(daemon_type);
        let request: PushRequest = serde_json::from_slice(&bodies[0]).unwrap();
        let hash = request.hash.clone();
        assert!(receiver.push(request).accepted);

        let managed = receiver.managed_configurations();
        assert_eq!(managed.hash, Some(hash));
        assert!(
            managed.managed.contains_key(&PartId(0)),
            "the {daemon_type} reports the part it works on"
        );
    }

    assert_ok!(arbiter.shutdown(true).await);
    assert_ok!(join.await.unwrap());
}
