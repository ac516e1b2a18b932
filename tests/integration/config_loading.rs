//! Configuration files turned into dispatchers

use std::io::Write;
use std::sync::Arc;

use assert_matches::assert_matches;
use fleet_arbiter::{
    config::read_config_file,
    error::{ConstructionError, DispatchError},
    links::{DaemonType, Transport, mock::MockTransport},
    loader::build_dispatcher,
};
use tempfile::NamedTempFile;

fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn transport() -> Arc<dyn Transport> {
    Arc::new(MockTransport::new())
}

const FLEET: &str = r#"{
    "arbiter": { "name": "arbiter-paris", "loop_interval": 5 },
    "realms": [
        { "name": "World", "default": true, "members": ["Paris"] },
        { "name": "Paris", "must_have": { "poller": 2 } }
    ],
    "daemons": [
        { "type": "arbiter", "name": "arbiter-paris", "address": "10.0.0.1" },
        { "type": "scheduler", "name": "scheduler-paris", "address": "10.0.1.1", "realm": "Paris" },
        { "type": "poller", "name": "poller-world", "address": "10.0.0.2", "port": 17771 },
        { "type": "poller", "name": "poller-paris", "address": "10.0.1.2", "realm": "Paris", "spare": true }
    ],
    "hosts": [
        { "name": "router", "realm": "Paris" },
        { "name": "nas", "realm": "Paris", "parents": ["router"], "services": ["smb"] }
    ]
}"#;

#[test]
fn test_file_builds_a_dispatcher() {
    let file = config_file(FLEET);
    let config = read_config_file(file.path()).unwrap();
    let dispatcher = build_dispatcher(&config, transport()).unwrap();

    assert_eq!(dispatcher.whole_conf().arbiter.name, "arbiter-paris");
    assert_eq!(dispatcher.whole_conf().arbiter.loop_interval, 5);
    assert_eq!(dispatcher.links().len(), 4);
    assert_eq!(dispatcher.schedulers().len(), 1);
    assert_eq!(dispatcher.satellites().len(), 2);

    let poller = dispatcher.link(DaemonType::Poller, "poller-world").unwrap();
    assert_eq!(poller.uri(), "http://10.0.0.2:17771");
    let scheduler = dispatcher.link(DaemonType::Scheduler, "scheduler-paris").unwrap();
    assert_eq!(scheduler.port(), DaemonType::Scheduler.default_port());

    let paris = dispatcher.realms().by_name("Paris").unwrap();
    let paris = dispatcher.realms().get(paris).unwrap();
    assert_eq!(paris.parts().count(), 1);
    assert_eq!(paris.parts().map(|part| part.host_count()).sum::<usize>(), 2);
    assert_eq!(paris.get_nb_of_must_have_satellites(DaemonType::Poller), 2);

    let world = dispatcher.realms().by_name("World").unwrap();
    assert_eq!(dispatcher.realms().get(world).unwrap().parts().count(), 0);
}

#[test]
fn test_two_master_arbiters_in_a_file() {
    let file = config_file(
        r#"{
            "daemons": [
                { "type": "arbiter", "name": "arbiter-master", "address": "10.0.0.1" },
                { "type": "arbiter", "name": "arbiter-backup", "address": "10.0.0.2" }
            ]
        }"#,
    );
    let config = read_config_file(file.path()).unwrap();

    assert_matches!(
        build_dispatcher(&config, transport()),
        Err(DispatchError::Construction(ConstructionError::TwoMasterArbiters { .. }))
    );
}

#[test]
fn test_host_in_unknown_realm() {
    let file = config_file(
        r#"{
            "daemons": [
                { "type": "arbiter", "name": "arbiter-master", "address": "10.0.0.1" },
                { "type": "scheduler", "name": "scheduler-1", "address": "10.0.0.2" }
            ],
            "hosts": [{ "name": "web-1", "realm": "Mars" }]
        }"#,
    );
    let config = read_config_file(file.path()).unwrap();

    assert_matches!(
        build_dispatcher(&config, transport()),
        Err(DispatchError::Construction(ConstructionError::UnknownRealm(realm))) if realm == "Mars"
    );
}

#[test]
fn test_unparsable_file_names_the_path() {
    let file = config_file("{ \"daemons\": [ }");
    let error = read_config_file(file.path()).unwrap_err();
    assert!(format!("{error:#}").contains(&file.path().display().to_string()));
}
