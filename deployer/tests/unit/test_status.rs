//! Server status state machine tests

use serde_json::json;

use beacon_deployer::beacon::response::HealthReport;
use beacon_deployer::deploy::fsm::{ProbeEvent, ServerStatus};
use beacon_deployer::errors::DeployError;
use beacon_deployer::models::server::Server;

use crate::common::{FakeBeacon, Reply};

fn answered(app_installed: bool, env_found: bool) -> ProbeEvent {
    ProbeEvent::Answered(HealthReport {
        app_installed,
        env_found,
        beacon_version: "2.0".to_string(),
    })
}

#[test]
fn test_status_initial_state() {
    assert_eq!(ServerStatus::default(), ServerStatus::Unreachable);
    let server = Server::new("web", "https://example.com/beacon.php");
    assert_eq!(server.status_code, ServerStatus::Unreachable);
}

#[test]
fn test_status_from_probe() {
    assert_eq!(ServerStatus::from_probe(&answered(false, false)), ServerStatus::Ready);
    assert_eq!(ServerStatus::from_probe(&answered(false, true)), ServerStatus::Ready);
    assert_eq!(ServerStatus::from_probe(&answered(true, false)), ServerStatus::Legacy);
    assert_eq!(ServerStatus::from_probe(&answered(true, true)), ServerStatus::Active);
    assert_eq!(
        ServerStatus::from_probe(&ProbeEvent::Failed("timeout".to_string())),
        ServerStatus::Unreachable
    );
}

#[test]
fn test_failed_probe_from_any_state() {
    for status in [ServerStatus::Ready, ServerStatus::Active, ServerStatus::Legacy] {
        let mut server = Server::new("web", "https://example.com");
        server.status_code = status;
        let changed = server.apply_probe(Err(DeployError::ProtocolError("garbage".to_string())));
        assert!(changed);
        assert_eq!(server.status_code, ServerStatus::Unreachable);
    }
}

#[test]
fn test_status_serializes_lowercase() {
    assert_eq!(serde_json::to_string(&ServerStatus::Active).unwrap(), "\"active\"");
    let status: ServerStatus = serde_json::from_str("\"legacy\"").unwrap();
    assert_eq!(status, ServerStatus::Legacy);
}

#[tokio::test]
async fn test_probe_over_http() {
    let beacon = FakeBeacon::start(Reply::json(201, json!({"appInstalled": false}))).await;
    let scripts = tempfile::tempdir().unwrap();
    let client = beacon.client(Some("2.0"), scripts.path());
    let mut server = beacon.server(Some("2.0"));

    assert!(server.test_beacon(&client).await);
    assert_eq!(server.status_code, ServerStatus::Ready);
    // A beacon that does not report its version speaks the legacy protocol
    assert_eq!(server.beacon_version.as_deref(), Some("1.0"));

    beacon.set_reply(Reply::json(
        201,
        json!({"appInstalled": true, "envFound": true, "beaconVersion": "2.0"}),
    ));
    assert!(server.test_beacon(&client).await);
    assert_eq!(server.status_code, ServerStatus::Active);
    assert!(!server.is_legacy());

    assert!(!server.test_beacon(&client).await);

    beacon.set_reply(Reply::json(500, json!({})));
    assert!(server.test_beacon(&client).await);
    assert_eq!(server.status_code, ServerStatus::Unreachable);
    assert_eq!(server.beacon_version.as_deref(), Some("2.0"));
}
