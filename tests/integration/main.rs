//! Integration tests using WireMock
//!
//! These tests drive the resilient client through the real reqwest transport
//! against a mock upstream: login, data calls, invalidation and the webhook bridge.

mod client;
mod webhook;

use serde_json::json;
use session_auth_integration::{session_auth_config, RetryConfig, SessionAuthConfigBuilder};
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builder pointed at the mock server with background work and retry disabled.
pub fn test_config(server: &MockServer) -> SessionAuthConfigBuilder {
    session_auth_config()
        .base_url(server.uri())
        .credentials("svc-user", "svc-pass")
        .timeout(Duration::from_secs(5))
        .scheduler_enabled(false)
        .retry(RetryConfig {
            max_attempts: 1,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
        })
}

/// Login mock answering with the given body.
pub fn login_mock(body: serde_json::Value) -> Mock {
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_json(json!({"username": "svc-user", "password": "svc-pass"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
}
