mod common;

use std::time::Duration;

use common::{client_for, make_token, test_config};
use serde_json::json;
use sonraictl::{error::ApiError, graphql_errors};
use tempfile::tempdir;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const PROBE_QUERY: &str = "{ Tickets { items { srn } } }";

async fn classify_status(status: u16) -> Result<serde_json::Value, ApiError> {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({"data": {}})))
        .mount(&server)
        .await;
    let mut client = client_for(test_config(), &server.uri(), &make_token(86_400), &dir);
    client.execute(PROBE_QUERY, json!({}), "probe").await
}

#[tokio::test]
async fn status_401_means_the_token_was_rejected() {
    assert!(matches!(classify_status(401).await, Err(ApiError::TokenExpired)));
}

#[tokio::test]
async fn statuses_402_403_404_are_authentication_failures() {
    for status in [402, 403, 404] {
        assert!(
            matches!(classify_status(status).await, Err(ApiError::Authentication)),
            "status {status} should classify as an authentication failure"
        );
    }
}

#[tokio::test]
async fn status_500_is_non_fatal_and_returns_the_body() {
    let body = classify_status(500).await.expect("500 bodies are returned for inspection");
    assert_eq!(body, json!({"data": {}}));
}

#[tokio::test]
async fn status_200_returns_the_decoded_body() {
    let body = classify_status(200).await.unwrap();
    assert_eq!(body, json!({"data": {}}));
}

#[tokio::test]
async fn unexpected_statuses_carry_their_code() {
    match classify_status(418).await {
        Err(ApiError::Status(418)) => {}
        other => panic!("expected Status(418), got {other:?}"),
    }
}

#[tokio::test]
async fn graphql_errors_pass_through_to_the_caller() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{"message": "Cannot query field \"bogus\" on type \"Query\""}]
        })))
        .mount(&server)
        .await;

    let mut client = client_for(test_config(), &server.uri(), &make_token(86_400), &dir);
    // The executor succeeds; interpreting the errors array is our job.
    let body = client.execute(PROBE_QUERY, json!({}), "probe").await.unwrap();
    let errors = graphql_errors(&body).unwrap();
    assert!(errors.contains("Cannot query field"));
}

#[tokio::test]
async fn backend_grpc_fault_marker_is_non_fatal() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{"message": "Unexpected exception while fetching Grpc data"}]
        })))
        .mount(&server)
        .await;

    let mut client = client_for(test_config(), &server.uri(), &make_token(86_400), &dir);
    let body = client.execute(PROBE_QUERY, json!({}), "probe").await.unwrap();
    assert!(graphql_errors(&body).is_some());
}

#[tokio::test]
async fn transport_retries_exhaust_after_max_attempts() {
    let dir = tempdir().unwrap();
    let mut config = test_config();
    config.max_attempts = 3;
    config.request_timeout = Duration::from_millis(250);
    // Nothing listens on port 9: every attempt is a connection error.
    let mut client = client_for(config, "http://127.0.0.1:9", &make_token(86_400), &dir);

    match client.execute(PROBE_QUERY, json!({}), "probe").await {
        Err(ApiError::Transport { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected transport exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn transport_recovers_when_an_attempt_succeeds() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();

    // First two attempts stall past the client timeout, the third lands.
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": {}}))
                .set_delay(Duration::from_secs(2)),
        )
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"ok": true}})))
        .mount(&server)
        .await;

    let mut config = test_config();
    config.request_timeout = Duration::from_millis(300);
    let mut client = client_for(config, &server.uri(), &make_token(86_400), &dir);

    let body = client.execute(PROBE_QUERY, json!({}), "probe").await.unwrap();
    assert_eq!(body, json!({"data": {"ok": true}}));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn requests_carry_the_contract_headers() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let token = make_token(86_400);
    let auth = format!("Bearer {token}");

    // The mock only matches when the whole header set and body shape are
    // present; .expect(1) fails the test on teardown otherwise.
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("authorization", auth.as_str()))
        .and(header("query-name", "MyQueryTag"))
        .and(header("cache-control", "no-cache"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "query": PROBE_QUERY,
            "variables": {"limit": 5},
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = client_for(test_config(), &server.uri(), &token, &dir);
    client.execute(PROBE_QUERY, json!({"limit": 5}), "MyQueryTag").await.unwrap();
}
