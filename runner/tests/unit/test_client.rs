//! Backend client tests against a mock server

use std::time::Duration;

use otarun::errors::ApiError;
use otarun::http::client::{ClientOptions, HttpClient};
use reqwest::Method;
use secrecy::SecretString;
use serde_json::json;
use sums_models::CreateEventRequest;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "s3cr3t-t0k3n";

fn client(server: &MockServer) -> HttpClient {
    HttpClient::new(ClientOptions::new(server.uri(), SecretString::from(TOKEN.to_string()))).unwrap()
}

#[tokio::test]
async fn test_success_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/deployments/deploy-1"))
        .and(header("authorization", format!("Bearer {TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "RUNNING"})))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server)
        .request(Method::GET, "/api/v1/deployments/deploy-1", None, &[])
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body["state"], "RUNNING");
}

#[tokio::test]
async fn test_query_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/events"))
        .and(query_param("dry_run", "true"))
        .and(body_json(json!({"vin": "KMHXX00XXXX000001"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "evt-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let body = json!({"vin": "KMHXX00XXXX000001"});
    let response = client(&server)
        .request(Method::POST, "api/v1/events", Some(&body), &[("dry_run", "true")])
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.body["id"], "evt-1");
}

#[tokio::test]
async fn test_auth_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string(format!("bad token {TOKEN}")))
        .mount(&server)
        .await;

    let err = client(&server)
        .request(Method::GET, "/api/v1/events/evt-1", None, &[])
        .await
        .unwrap_err();

    assert_eq!(err, ApiError::Auth { status: 401 });
    assert!(!err.is_transient());
    assert!(!format!("{err} {err:?}").contains(TOKEN));
}

#[tokio::test]
async fn test_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client(&server)
        .request(Method::GET, "/api/v1/deployments/missing", None, &[])
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ApiError::NotFound {
            path: "/api/v1/deployments/missing".to_string()
        }
    );
}

#[tokio::test]
async fn test_conflict_keeps_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/events/evt-1/fix"))
        .respond_with(
            ResponseTemplate::new(409).set_body_json(json!({"error": "event already fixed", "code": 17})),
        )
        .mount(&server)
        .await;

    let err = client(&server)
        .request(Method::POST, "/api/v1/events/evt-1/fix", Some(&json!({})), &[])
        .await
        .unwrap_err();

    match err {
        ApiError::Api { status, message, payload } => {
            assert_eq!(status, 409);
            assert_eq!(message, "event already fixed");
            assert_eq!(payload.unwrap()["code"], 17);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client(&server)
        .request(Method::GET, "/api/v1/deployments/deploy-1", None, &[])
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Api { status: 503, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_invalid_json_on_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .mount(&server)
        .await;

    let err = client(&server)
        .request(Method::GET, "/api/v1/events/evt-1", None, &[])
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Api { status: 200, .. }));
}

#[tokio::test]
async fn test_request_timeout_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"state": "RUNNING"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let mut options = ClientOptions::new(server.uri(), SecretString::from(TOKEN.to_string()));
    options.timeout = Duration::from_millis(200);
    let client = HttpClient::new(options).unwrap();

    let err = client
        .request(Method::GET, "/api/v1/deployments/deploy-1", None, &[])
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Transport(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let client = HttpClient::new(ClientOptions::new(
        "http://127.0.0.1:1",
        SecretString::from(TOKEN.to_string()),
    ))
    .unwrap();
    let err = client
        .request(Method::GET, "/api/v1/events/evt-1", None, &[])
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Transport(_)));
}

#[tokio::test]
async fn test_typed_endpoint_helpers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/events"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"event_id": "evt-9"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/deployments/deploy-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "FAILED",
            "error_message": "ecu rejected image"
        })))
        .mount(&server)
        .await;

    let client = client(&server);
    let request = CreateEventRequest {
        tester_name: "ci".into(),
        program_name: "NE1".into(),
        model_year: "2025".into(),
        vin: "KMHXX00XXXX000001".into(),
        update_type: "UROM".into(),
        region: "NA".into(),
        region_spec: None,
        build_level: "2024.01.01".into(),
        remark: None,
        ecus: Vec::new(),
    };
    let created = client.create_event(&request).await.unwrap();
    assert_eq!(created.event_id, "evt-9");

    let status = client.get_deployment_status("deploy-1").await.unwrap();
    assert_eq!(status.state(), "FAILED");
    assert_eq!(status.reason().as_deref(), Some("ecu rejected image"));
}
