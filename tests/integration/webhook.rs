//! Integration tests for webhook-driven acquisition

use super::*;
use chrono::Utc;
use session_auth_integration::{ResilientClient, SessionAuthError, WebhookError};
use wiremock::matchers::header;

fn webhook_config(server: &MockServer) -> SessionAuthConfigBuilder {
    test_config(server)
        .webhook(
            format!("{}/hooks/trigger", server.uri()),
            format!("{}/auth-data", server.uri()),
        )
        .webhook_polling(Duration::from_millis(50), Duration::from_millis(500), 1)
}

#[tokio::test]
async fn test_client_acquires_through_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/trigger"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth-data"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth-data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bearerToken": "hook-b",
            "apiToken": "hook-a",
            "authTime": Utc::now().to_rfc3339(),
            "isValid": true
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/items"))
        .and(header("authorization", "Bearer hook-b"))
        .and(header("x-api-token", "hook-a"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let client = ResilientClient::new(webhook_config(&server).build().unwrap()).unwrap();
    client.get("/v1/items").await.unwrap();

    assert_eq!(client.current_token().unwrap().access_credential(), "hook-b");
}

#[tokio::test]
async fn test_stale_credential_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/trigger"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth-data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bearerToken": "old-b",
            "apiToken": "old-a",
            "authTime": (Utc::now() - chrono::Duration::hours(2)).to_rfc3339()
        })))
        .mount(&server)
        .await;

    let client = ResilientClient::new(webhook_config(&server).build().unwrap()).unwrap();
    let error = client.get("/v1/items").await.unwrap_err();

    assert!(matches!(
        error,
        SessionAuthError::Webhook(WebhookError::Timeout { attempts: 1, .. })
    ));
    assert!(error.is_timeout());
}
