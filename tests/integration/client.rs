//! Integration tests for the resilient client

use super::*;
use futures::future::join_all;
use session_auth_integration::{
    AuthenticationError, CircuitState, NetworkError, RequestOptions, ResilientClient,
    SessionAuthError, UpstreamError,
};
use std::sync::Arc;
use wiremock::matchers::header;

#[tokio::test]
async fn test_login_then_authenticated_call() {
    let server = MockServer::start().await;
    login_mock(json!({"bearerToken": "b-1", "apiToken": "a-1", "expiresIn": 3600}))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/items"))
        .and(header("authorization", "Bearer b-1"))
        .and(header("x-api-token", "a-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [1, 2]})))
        .expect(1)
        .mount(&server)
        .await;

    let client = ResilientClient::new(test_config(&server).build().unwrap()).unwrap();
    let response = client.get("/v1/items").await.unwrap();

    assert_eq!(response.status, 200);
    let body: serde_json::Value = response.json().unwrap();
    assert_eq!(body["items"], json!([1, 2]));

    let token = client.current_token().unwrap();
    assert_eq!(token.access_credential(), "b-1");
    assert_eq!(token.secondary_credential(), "a-1");
}

#[tokio::test]
async fn test_concurrent_requests_share_one_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"bearerToken": "b-1", "apiToken": "a-1"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/items"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(10)
        .mount(&server)
        .await;

    let client = Arc::new(ResilientClient::new(test_config(&server).build().unwrap()).unwrap());
    let requests = (0..10).map(|_| {
        let client = client.clone();
        async move {
            client
                .request("/v1/items", RequestOptions::get().no_cache())
                .await
        }
    });

    let results = join_all(requests).await;
    assert!(results.iter().all(Result::is_ok));
}

#[tokio::test]
async fn test_invalidation_in_success_body_triggers_one_relogin() {
    let server = MockServer::start().await;
    login_mock(json!({"bearerToken": "b-old", "apiToken": "a-old"}))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    login_mock(json!({"bearerToken": "b-new", "apiToken": "a-new"}))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/orders"))
        .and(header("authorization", "Bearer b-old"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "INVALID SECURITY TOKEN"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/orders"))
        .and(header("authorization", "Bearer b-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"orders": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = ResilientClient::new(test_config(&server).build().unwrap()).unwrap();
    let response = client.get("/v1/orders").await.unwrap();

    assert!(response.body.contains("orders"));
    assert_eq!(client.current_token().unwrap().access_credential(), "b-new");
}

#[tokio::test]
async fn test_repeated_rejection_surfaces_expired() {
    let server = MockServer::start().await;
    login_mock(json!({"bearerToken": "b", "apiToken": "a"}))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let client = ResilientClient::new(test_config(&server).build().unwrap()).unwrap();
    let error = client.get("/v1/orders").await.unwrap_err();

    assert!(matches!(
        error,
        SessionAuthError::Authentication(AuthenticationError::Expired)
    ));
}

#[tokio::test]
async fn test_array_shaped_login_response() {
    let server = MockServer::start().await;
    login_mock(json!([{"access_token": "b-arr", "security_token": "a-arr"}]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/items"))
        .and(header("authorization", "Bearer b-arr"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;

    let client = ResilientClient::new(test_config(&server).build().unwrap()).unwrap();
    client.get("/v1/items").await.unwrap();

    assert_eq!(client.current_token().unwrap().secondary_credential(), "a-arr");
}

#[tokio::test]
async fn test_login_without_credentials_fails_request() {
    let server = MockServer::start().await;
    login_mock(json!({"result": "ok"})).mount(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1/items"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = ResilientClient::new(test_config(&server).build().unwrap()).unwrap();
    let error = client.get("/v1/items").await.unwrap_err();

    assert!(matches!(
        error,
        SessionAuthError::Authentication(AuthenticationError::Required { .. })
    ));
    assert!(client.current_token().is_none());
}

#[tokio::test]
async fn test_cached_read_skips_upstream() {
    let server = MockServer::start().await;
    login_mock(json!({"bearerToken": "b", "apiToken": "a"}))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/catalog"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"v\":1}"))
        .expect(1)
        .mount(&server)
        .await;

    let client = ResilientClient::new(test_config(&server).build().unwrap()).unwrap();
    let first = client.get("/v1/catalog").await.unwrap();
    let second = client.get("/v1/catalog").await.unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(first.body, second.body);
}

#[tokio::test]
async fn test_server_errors_open_the_circuit() {
    let server = MockServer::start().await;
    login_mock(json!({"bearerToken": "b", "apiToken": "a"}))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let config = test_config(&server)
        .circuit_breaker(2, Duration::from_secs(60))
        .build()
        .unwrap();
    let client = ResilientClient::new(config).unwrap();

    for _ in 0..2 {
        let error = client
            .request("/v1/flaky", RequestOptions::get().no_cache())
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            SessionAuthError::Upstream(UpstreamError::ServerError { status: 503, .. })
        ));
    }
    assert_eq!(client.circuit_state(), CircuitState::Open);

    let error = client
        .request("/v1/flaky", RequestOptions::get().no_cache())
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        SessionAuthError::Network(NetworkError::CircuitOpen)
    ));
}

#[tokio::test]
async fn test_rate_limited_response_carries_retry_after() {
    let server = MockServer::start().await;
    login_mock(json!({"bearerToken": "b", "apiToken": "a"}))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let client = ResilientClient::new(test_config(&server).build().unwrap()).unwrap();
    let error = client.get("/v1/busy").await.unwrap_err();

    assert_eq!(error.retry_after(), Some(Duration::from_secs(7)));
    assert_eq!(client.circuit_state(), CircuitState::Closed);
}
