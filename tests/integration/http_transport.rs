//! HTTP transport against mocked daemons

use std::time::Duration;

use assert_matches::assert_matches;
use fleet_arbiter::{
    PushRequest,
    error::LinkError,
    links::{DaemonType, HttpTransport, LinkTarget, SECRET_HEADER, Transport},
    payload::{ArbiterPayload, DaemonIdentity, DaemonPayload, GlobalSettings},
};
use uuid::Uuid;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, body_partial_json, header, method, path},
};

fn target(uri: String, token: Option<&str>) -> LinkTarget {
    LinkTarget {
        name: "poller-1".to_string(),
        daemon_type: DaemonType::Poller,
        uri,
        token: token.map(str::to_string),
        timeout: Duration::from_secs(2),
    }
}

fn spare_arbiter_payload() -> DaemonPayload {
    DaemonPayload::Arbiter(ArbiterPayload {
        identity: DaemonIdentity {
            name: "arbiter-spare".to_string(),
            daemon_type: DaemonType::Arbiter,
            uuid: Uuid::new_v4(),
            realm: "All".to_string(),
            spare: true,
        },
        global: GlobalSettings {
            config_name: "fleet".to_string(),
            arbiter_name: "arbiter-master".to_string(),
        },
        whole_conf: None,
    })
}

#[tokio::test]
async fn test_ping_sends_the_secret() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ping"))
        .and(header(SECRET_HEADER, "s3cret"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "running_id": "abc" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new().unwrap();
    let ping = transport
        .ping(&target(server.uri(), Some("s3cret")))
        .await
        .unwrap();
    assert_eq!(ping.running_id, "abc");
}

#[tokio::test]
async fn test_push_carries_hash_and_payload() {
    let server = MockServer::start().await;
    let payload = spare_arbiter_payload();
    let hash = payload.fingerprint().unwrap();

    Mock::given(method("POST"))
        .and(path("/push_configuration"))
        .and(body_partial_json(serde_json::json!({ "hash": hash.as_str() })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "accepted": true })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new().unwrap();
    let response = transport
        .push_configuration(&target(server.uri(), None), &PushRequest { hash, payload })
        .await
        .unwrap();
    assert!(response.accepted);
}

#[tokio::test]
async fn test_stop_request_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/stop_request"))
        .and(body_json(serde_json::json!({ "stop_now": true })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new().unwrap();
    transport
        .stop_request(&target(format!("{}/", server.uri()), None), true)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_error_status_is_an_application_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/managed_configurations"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad secret"))
        .mount(&server)
        .await;

    let transport = HttpTransport::new().unwrap();
    let result = transport
        .managed_configurations(&target(server.uri(), Some("wrong")))
        .await;
    assert_matches!(
        result,
        Err(LinkError::Application { status: 401, message }) if message == "bad secret"
    );
}

#[tokio::test]
async fn test_malformed_answer_is_a_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{invalid json"))
        .mount(&server)
        .await;

    let transport = HttpTransport::new().unwrap();
    let result = transport.get_events(&target(server.uri(), None)).await;
    assert_matches!(result, Err(LinkError::Decode(_)));
}

#[tokio::test]
async fn test_closed_port_is_unreachable() {
    // bind then drop to get a port nobody listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let transport = HttpTransport::new().unwrap();
    let result = transport
        .ping(&target(format!("http://127.0.0.1:{port}"), None))
        .await;
    assert_matches!(result, Err(LinkError::Unreachable(_)));
}

#[tokio::test]
async fn test_slow_daemon_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "running_id": "late" }))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let mut slow = target(server.uri(), None);
    slow.timeout = Duration::from_millis(200);

    let transport = HttpTransport::new().unwrap();
    assert_matches!(transport.ping(&slow).await, Err(LinkError::Unreachable(_)));
}
