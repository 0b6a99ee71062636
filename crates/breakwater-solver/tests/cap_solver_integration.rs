//! Protocol tests for the CapSolver client against a mock API.

use breakwater_solver::providers::CaptchaProvider;
use breakwater_solver::CapSolverProvider;
use breakwater_types::{ProviderSettings, SolverError, TurnstileRequest};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider_for(server: &MockServer, deadline: Duration) -> CapSolverProvider {
    CapSolverProvider::from_settings(&ProviderSettings {
        api_key: Some("cap-key".to_string()),
        base_url: Some(server.uri()),
        timeout: Some(deadline),
    })
    .unwrap()
    .with_poll_interval(Duration::from_millis(20))
}

fn turnstile_request() -> TurnstileRequest {
    let mut request =
        TurnstileRequest::new("0x4AAAAAAATEST", "https://example.com/protected", "Mozilla/5.0");
    request.action = Some("login".to_string());
    request
}

#[tokio::test]
async fn solves_with_string_task_id_and_fixed_cost() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/createTask"))
        .and(body_partial_json(json!({
            "clientKey": "cap-key",
            "task": {
                "type": "AntiTurnstileTaskProxyLess",
                "websiteKey": "0x4AAAAAAATEST",
                "metadata": { "action": "login" }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errorId": 0,
            "taskId": "b7e4c1a2-93f2-4a3e-b48c-0d5a2c9e7f11"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/getTaskResult"))
        .and(body_partial_json(json!({
            "taskId": "b7e4c1a2-93f2-4a3e-b48c-0d5a2c9e7f11"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errorId": 0,
            "status": "ready",
            "solution": { "token": "CAP_TKN", "type": "turnstile" }
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server, Duration::from_secs(5));
    let result = provider
        .solve_turnstile(&turnstile_request(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.token, "CAP_TKN");
    assert_eq!(result.provider_name, "capsolver");
    // CapSolver quotes no per-solve price; the client reports the flat
    // published estimate.
    assert!((result.cost - 0.0025).abs() < 1e-9);
}

#[tokio::test]
async fn failed_status_is_a_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/createTask"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errorId": 0,
            "taskId": "task-1"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/getTaskResult"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errorId": 0,
            "status": "failed"
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server, Duration::from_secs(5));
    let err = provider
        .solve_turnstile(&turnstile_request(), &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        SolverError::Rejected { code, .. } => assert_eq!(code, "TASK_FAILED"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn invalid_key_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/createTask"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errorId": 1,
            "errorCode": "ERROR_INVALID_CLIENTKEY"
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server, Duration::from_secs(5));
    let err = provider
        .solve_turnstile(&turnstile_request(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SolverError::Rejected {
            retryable: false,
            ..
        }
    ));
}

#[tokio::test]
async fn polling_deadline_produces_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/createTask"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errorId": 0,
            "taskId": "task-2"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/getTaskResult"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errorId": 0,
            "status": "processing"
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server, Duration::from_millis(150));
    let err = provider
        .solve_turnstile(&turnstile_request(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SolverError::Timeout { .. }));
}

#[tokio::test]
async fn balance_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/getBalance"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errorId": 0,
            "balance": 12.75
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server, Duration::from_secs(5));
    let balance = provider.balance().await.unwrap();
    assert!((balance - 12.75).abs() < 1e-9);
}
