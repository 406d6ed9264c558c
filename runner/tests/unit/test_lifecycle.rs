//! Event lifecycle tests against a mock backend

use std::sync::Arc;

use otarun::deploy::fsm::DeploymentState;
use otarun::deploy::lifecycle::EventLifecycle;
use otarun::errors::{ApiError, LifecycleError};
use otarun::http::client::{ClientOptions, HttpClient};
use otarun::models::event::{Ecu, Event, EventKind};
use otarun::models::plan::{DeployWindow, EventContext, UpdateType};
use otarun::models::test_run::TestStatus;
use secrecy::SecretString;
use serde_json::json;
use sums_models::TestEventRequest;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VIN: &str = "KMHXX00XXXX000001";

fn context() -> EventContext {
    EventContext {
        tester_name: "ci".to_string(),
        program_name: "NE1".to_string(),
        model_year: "2025".to_string(),
        update_type: UpdateType::Urom,
        region: "NA".to_string(),
        region_spec: None,
        remark: Some("nightly".to_string()),
    }
}

fn ecus(version: &str) -> Vec<Ecu> {
    vec![Ecu {
        name: "BCM".to_string(),
        part_number: "91950-AA000".to_string(),
        version: version.to_string(),
    }]
}

fn lifecycle(server: &MockServer) -> EventLifecycle {
    let client = HttpClient::new(ClientOptions::new(server.uri(), SecretString::from("t0k3n".to_string()))).unwrap();
    EventLifecycle::new(Arc::new(client), context())
}

async fn mount_event(server: &MockServer, build_level: &str, id: &str) {
    Mock::given(method("POST"))
        .and(path("/api/v1/events"))
        .and(body_partial_json(json!({"build_level": build_level})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": id})))
        .mount(server)
        .await;
}

async fn mount_fix(server: &MockServer, id: &str, expected: u64) {
    Mock::given(method("POST"))
        .and(path(format!("/api/v1/events/{id}/fix")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"fixed": true})))
        .expect(expected)
        .mount(server)
        .await;
}

async fn locked_target(server: &MockServer, lifecycle: &EventLifecycle) -> Event {
    mount_event(server, "2024.02.01", "evt-2").await;
    mount_fix(server, "evt-2", 1).await;
    let target = lifecycle
        .create_event(EventKind::Target, VIN, "2024.02.01", &ecus("1.1.0"))
        .await
        .unwrap();
    lifecycle.lock_event(&target).await.unwrap()
}

#[tokio::test]
async fn test_create_event_sends_declaration() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/events"))
        .and(body_partial_json(json!({
            "vin": VIN,
            "update_type": "UROM",
            "build_level": "2024.01.01",
            "remark": "nightly",
            "ecus": [{"ecu_name": "BCM", "part_number": "91950-AA000", "sw_version": "1.0.0"}]
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"event_id": "evt-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let event = lifecycle(&server)
        .create_event(EventKind::Source, VIN, "2024.01.01", &ecus("1.0.0"))
        .await
        .unwrap();

    assert_eq!(event.event_id(), "evt-1");
    assert_eq!(event.kind(), EventKind::Source);
    assert_eq!(event.vehicle_id(), VIN);
    assert_eq!(event.ecu_list(), ecus("1.0.0").as_slice());
    assert!(!event.locked());

    // the kind is tracked locally only
    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = requests[0].body_json().unwrap();
    assert!(body.get("event_kind").is_none(), "{body}");
}

#[tokio::test]
async fn test_create_event_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/events"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"message": "unknown part number"})))
        .expect(1)
        .mount(&server)
        .await;

    let err = lifecycle(&server)
        .create_event(EventKind::Source, VIN, "2024.01.01", &ecus("1.0.0"))
        .await
        .unwrap_err();

    match err {
        LifecycleError::Api(ApiError::Api { status, message, .. }) => {
            assert_eq!(status, 422);
            assert_eq!(message, "unknown part number");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_lock_is_irreversible_and_single() {
    let server = MockServer::start().await;
    mount_event(&server, "2024.01.01", "evt-1").await;
    mount_fix(&server, "evt-1", 1).await;

    let lifecycle = lifecycle(&server);
    let event = lifecycle
        .create_event(EventKind::Source, VIN, "2024.01.01", &ecus("1.0.0"))
        .await
        .unwrap();

    let locked = lifecycle.lock_event(&event).await.unwrap();
    assert!(locked.locked());
    assert!(!event.locked());

    // second lock fails locally; the fix endpoint is hit exactly once
    let err = lifecycle.lock_event(&locked).await.unwrap_err();
    assert_eq!(
        err,
        LifecycleError::AlreadyLocked {
            event_id: "evt-1".to_string()
        }
    );
    assert_eq!(err.kind(), "already_locked");
}

#[tokio::test]
async fn test_locked_event_rejects_mutation() {
    let server = MockServer::start().await;
    let lifecycle = lifecycle(&server);
    let mut target = locked_target(&server, &lifecycle).await;

    let err = target.set_build_level("2024.03.01").unwrap_err();
    assert!(matches!(err, LifecycleError::Immutable { .. }));
    assert!(target.set_ecu_list(ecus("9.9.9")).is_err());
    assert_eq!(target.build_level(), "2024.02.01");
    assert_eq!(target.ecu_list(), ecus("1.1.0").as_slice());
}

#[tokio::test]
async fn test_any_successful_fix_reply_locks() {
    let server = MockServer::start().await;
    mount_event(&server, "2024.01.01", "evt-1").await;
    mount_event(&server, "2024.02.01", "evt-2").await;
    Mock::given(method("POST"))
        .and(path("/api/v1/events/evt-1/fix"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"event_id": "evt-1", "locked": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/events/evt-2/fix"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let lifecycle = lifecycle(&server);
    let source = lifecycle
        .create_event(EventKind::Source, VIN, "2024.01.01", &ecus("1.0.0"))
        .await
        .unwrap();
    let target = lifecycle
        .create_event(EventKind::Target, VIN, "2024.02.01", &ecus("1.1.0"))
        .await
        .unwrap();

    assert!(lifecycle.lock_event(&source).await.unwrap().locked());
    assert!(lifecycle.lock_event(&target).await.unwrap().locked());
}

#[tokio::test]
async fn test_rejected_fix_does_not_lock() {
    let server = MockServer::start().await;
    mount_event(&server, "2024.01.01", "evt-1").await;
    Mock::given(method("POST"))
        .and(path("/api/v1/events/evt-1/fix"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({"error": "event already fixed"})))
        .mount(&server)
        .await;

    let lifecycle = lifecycle(&server);
    let event = lifecycle
        .create_event(EventKind::Source, VIN, "2024.01.01", &ecus("1.0.0"))
        .await
        .unwrap();

    let err = lifecycle.lock_event(&event).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Api(ApiError::Api { status: 409, .. })));
    assert!(!event.locked());
}

#[tokio::test]
async fn test_deploy_requires_locked_target() {
    let server = MockServer::start().await;
    mount_event(&server, "2024.01.01", "evt-1").await;
    mount_fix(&server, "evt-1", 1).await;
    mount_event(&server, "2024.02.01", "evt-2").await;
    Mock::given(method("POST"))
        .and(path("/api/v1/deployments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "deploy-1"})))
        .expect(0)
        .mount(&server)
        .await;

    let lifecycle = lifecycle(&server);
    let window = DeployWindow::default();

    let source = lifecycle
        .create_event(EventKind::Source, VIN, "2024.01.01", &ecus("1.0.0"))
        .await
        .unwrap();
    let source = lifecycle.lock_event(&source).await.unwrap();
    let err = lifecycle.deploy(&source, &window).await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotDeployable { ref event_id, .. } if event_id == "evt-1"));

    let target = lifecycle
        .create_event(EventKind::Target, VIN, "2024.02.01", &ecus("1.1.0"))
        .await
        .unwrap();
    let err = lifecycle.deploy(&target, &window).await.unwrap_err();
    assert_eq!(err.kind(), "not_deployable");
    assert!(err.to_string().contains("not locked"));
}

#[tokio::test]
async fn test_deploy_and_status() {
    let server = MockServer::start().await;
    let lifecycle = lifecycle(&server);
    let target = locked_target(&server, &lifecycle).await;

    Mock::given(method("POST"))
        .and(path("/api/v1/deployments"))
        .and(body_partial_json(json!({
            "event_id": "evt-2",
            "deployment_count": 1,
            "start_datetime": "2024-02-01T10:00:00Z"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"deployment_id": "deploy-1", "state": "SCHEDULED"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/deployments/deploy-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "RUNNING",
            "timestamps": {"started_at": "2024-02-01T10:01:00Z"}
        })))
        .mount(&server)
        .await;

    let window = DeployWindow {
        start_datetime: Some("2024-02-01T10:00:00Z".to_string()),
        ..Default::default()
    };
    let deployment = lifecycle.deploy(&target, &window).await.unwrap();
    assert_eq!(deployment.deployment_id, "deploy-1");
    assert_eq!(deployment.target_event_id, "evt-2");
    assert_eq!(deployment.state(), DeploymentState::Pending);

    let snapshot = lifecycle.deployment_status("deploy-1").await.unwrap();
    assert_eq!(snapshot.state, "RUNNING");
    assert_eq!(snapshot.timestamps["started_at"], "2024-02-01T10:01:00Z");
}

#[tokio::test]
async fn test_event_status_defaults_to_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/events/evt-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let snapshot = lifecycle(&server).event_status("evt-1").await.unwrap();
    assert_eq!(snapshot.state, "UNKNOWN");
    assert!(snapshot.reason.is_none());
}

#[tokio::test]
async fn test_test_run_is_reported_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/test_events"))
        .and(body_partial_json(json!({"event_id": "evt-2", "suite_name": "ota-smoke"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "te-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/v1/test_events/te-1"))
        .and(body_partial_json(json!({"status": "PASS", "artifact_urls": ["https://ci.example.com/run/1"]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let lifecycle = lifecycle(&server);
    let request = TestEventRequest {
        vin: VIN.to_string(),
        vehicle_id: None,
        event_id: "evt-2".to_string(),
        ansible_job_id: "job-1".to_string(),
        git_sha: "abc1234".to_string(),
        suite_name: "ota-smoke".to_string(),
        metadata: None,
    };
    let mut test_run = lifecycle.open_test_run(&request).await.unwrap();
    assert_eq!(test_run.test_event_id, "te-1");
    assert!(!test_run.is_reported());

    lifecycle
        .report(
            &mut test_run,
            TestStatus::Pass,
            "Deployment deploy-1 reached COMPLETE".to_string(),
            vec!["https://ci.example.com/run/1".to_string()],
            Some(json!({"deployment_id": "deploy-1"})),
        )
        .await
        .unwrap();
    assert!(test_run.is_reported());
    assert_eq!(test_run.status(), Some(TestStatus::Pass));

    let err = lifecycle
        .report(&mut test_run, TestStatus::Fail, "again".to_string(), Vec::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyReported { .. }));
    assert_eq!(test_run.status(), Some(TestStatus::Pass));
}
