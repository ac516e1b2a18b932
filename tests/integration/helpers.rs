//! Helper functions for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use fleet_arbiter::{
    config::{ArbiterSettings, DaemonConfig, FleetConfig, HostConfig, MustHave, RealmConfig},
    dispatcher::Dispatcher,
    links::{DaemonType, Transport, mock::MockTransport},
    loader::build_dispatcher,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

/// Daemon probed on every call
pub fn daemon(daemon_type: DaemonType, name: &str) -> DaemonConfig {
    let mut config = DaemonConfig::new(daemon_type, name, "127.0.0.1");
    config.polling_interval = 0;
    config
}

pub fn in_realm(mut config: DaemonConfig, realm: &str) -> DaemonConfig {
    config.realm = Some(realm.to_string());
    config
}

pub fn spare(mut config: DaemonConfig) -> DaemonConfig {
    config.spare = true;
    config
}

pub fn host(name: &str, realm: &str) -> HostConfig {
    HostConfig {
        name: name.to_string(),
        address: None,
        realm: Some(realm.to_string()),
        parents: vec![],
        services: vec!["ping".to_string(), "http".to_string()],
    }
}

pub fn realm(name: &str, default: bool, members: &[&str]) -> RealmConfig {
    RealmConfig {
        name: name.to_string(),
        default,
        members: members.iter().map(|m| m.to_string()).collect(),
        must_have: MustHave::default(),
    }
}

/// Settings for a loop that only ticks on demand and never sleeps
pub fn quiet_settings() -> ArbiterSettings {
    ArbiterSettings {
        loop_interval: 3600,
        dispatch_retry_pause: 0,
        stop_timeout: 0,
        ..ArbiterSettings::default()
    }
}

/// "All" with a "Europe" sub-realm, each with its own scheduler.
///
/// The pollers and the broker of "All" serve "Europe" too, the scheduler of
/// "All" does not.
pub fn two_realm_fleet() -> FleetConfig {
    let mut scheduler_all = daemon(DaemonType::Scheduler, "scheduler-all");
    scheduler_all.manage_sub_realms = false;

    FleetConfig {
        arbiter: quiet_settings(),
        realms: vec![realm("All", true, &["Europe"]), realm("Europe", false, &[])],
        daemons: vec![
            daemon(DaemonType::Arbiter, "arbiter-master"),
            spare(daemon(DaemonType::Arbiter, "arbiter-spare")),
            scheduler_all,
            in_realm(daemon(DaemonType::Scheduler, "scheduler-eu"), "Europe"),
            spare(in_realm(
                daemon(DaemonType::Scheduler, "scheduler-eu-spare"),
                "Europe",
            )),
            daemon(DaemonType::Poller, "poller-all"),
            in_realm(daemon(DaemonType::Poller, "poller-eu"), "Europe"),
            daemon(DaemonType::Broker, "broker-all"),
        ],
        hosts: vec![
            host("gateway", "All"),
            host("eu-web-1", "Europe"),
            host("eu-db-1", "Europe"),
        ],
        api: None,
    }
}

pub fn build(config: &FleetConfig) -> (Dispatcher, MockTransport) {
    let mock = MockTransport::new();
    let transport: Arc<dyn Transport> = Arc::new(mock.clone());
    let dispatcher = build_dispatcher(config, transport).unwrap();
    (dispatcher, mock)
}

/// Run one full probe / prepare / push round
pub async fn dispatch_once(dispatcher: &mut Dispatcher) -> bool {
    dispatcher.check_reachable(true).await;
    dispatcher.prepare_dispatch().unwrap();
    dispatcher.dispatch().await.unwrap()
}

/// Point a daemon declaration at a wiremock server
pub fn served_by(mut config: DaemonConfig, server: &MockServer) -> DaemonConfig {
    let url = url::Url::parse(&server.uri()).unwrap();
    config.address = url.host_str().unwrap().to_string();
    config.port = url.port();
    config
}

/// A wiremock server answering like a freshly started, empty daemon
pub async fn satellite_server(running_id: &str) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "running_id": running_id })),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/managed_configurations"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "hash": null, "managed": {} })),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/push_configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "accepted": true })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    server
}
