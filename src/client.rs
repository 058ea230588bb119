//! Resilient Client
//!
//! The façade application code calls. Each request passes through the
//! response cache, the rate limiter, the single-flight refresher and the
//! circuit breaker, with request-level backoff retry around the whole
//! attempt and exactly one forced re-authentication when the upstream
//! signals that the credential in use is no longer valid.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::{
    HttpRequest, HttpResponse, HttpTransport, InvalidationDetector, ReqwestHttpTransport,
    StatusFieldDetector,
};
use crate::error::{
    create_error_from_response, AuthenticationError, SessionAuthError, SessionAuthResult,
    UpstreamError,
};
use crate::resilience::{
    cache_key, BackoffRetryExecutor, CircuitBreaker, CircuitState, RateLimiter, ResponseCache,
    RetryExecutor, SessionCircuitBreaker, SlidingWindowRateLimiter,
};
use crate::telemetry::{NoOpMetrics, SessionMetrics};
use crate::token::{
    ExpiryHealthProbe, HealthProbe, InMemoryTokenStore, LoginTokenAcquirer,
    ProactiveRefreshScheduler, RandomJitter, SingleFlightRefresher, TokenAcquirer, TokenStore,
    WebhookAuthBridge,
};
use crate::types::{join_url, ApiResponse, RequestOptions, SessionAuthConfig, TokenInfo};

/// Maximum accepted response size for the default transport.
const MAX_RESPONSE_SIZE: usize = 4 * 1024 * 1024;

/// Optional collaborators for [`ResilientClient::with_components`].
///
/// Anything left `None` is built from the configuration.
#[derive(Default)]
pub struct ClientComponents {
    pub acquirer: Option<Arc<dyn TokenAcquirer>>,
    pub store: Option<Arc<dyn TokenStore>>,
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
    pub detector: Option<Arc<dyn InvalidationDetector>>,
    pub health_probe: Option<Arc<dyn HealthProbe>>,
    pub metrics: Option<Arc<dyn SessionMetrics>>,
}

/// Resilient client for the session-authenticated upstream.
pub struct ResilientClient<T: HttpTransport + 'static = ReqwestHttpTransport> {
    config: SessionAuthConfig,
    transport: Arc<T>,
    refresher: Arc<SingleFlightRefresher>,
    rate_limiter: Arc<dyn RateLimiter>,
    circuit_breaker: SessionCircuitBreaker,
    retry: BackoffRetryExecutor,
    cache: ResponseCache<ApiResponse>,
    detector: Arc<dyn InvalidationDetector>,
    health_probe: Arc<dyn HealthProbe>,
    metrics: Arc<dyn SessionMetrics>,
    scheduler: Mutex<Option<ProactiveRefreshScheduler>>,
}

impl ResilientClient<ReqwestHttpTransport> {
    /// Create a client with the reqwest transport and default components.
    pub fn new(config: SessionAuthConfig) -> SessionAuthResult<Self> {
        let transport = ReqwestHttpTransport::with_options(config.timeout, MAX_RESPONSE_SIZE)?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: HttpTransport + 'static> ResilientClient<T> {
    /// Create a client over a custom transport.
    pub fn with_transport(config: SessionAuthConfig, transport: T) -> Self {
        Self::with_components(config, transport, ClientComponents::default())
    }

    /// Create a client with custom collaborators.
    pub fn with_components(
        config: SessionAuthConfig,
        transport: T,
        components: ClientComponents,
    ) -> Self {
        let transport = Arc::new(transport);
        let shared_transport: Arc<dyn HttpTransport> = transport.clone();

        let acquirer: Arc<dyn TokenAcquirer> = match (components.acquirer, &config.webhook) {
            (Some(acquirer), _) => acquirer,
            (None, Some(webhook)) => Arc::new(WebhookAuthBridge::new(
                shared_transport,
                webhook.clone(),
                config.refresh.clone(),
            )),
            (None, None) => Arc::new(LoginTokenAcquirer::new(
                shared_transport,
                config.login_path.clone(),
                config.timeout,
                config.refresh.clone(),
            )),
        };
        let store: Arc<dyn TokenStore> = match components.store {
            Some(store) => store,
            None => Arc::new(InMemoryTokenStore::new()),
        };
        let metrics: Arc<dyn SessionMetrics> = match components.metrics {
            Some(metrics) => metrics,
            None => Arc::new(NoOpMetrics),
        };
        let rate_limiter: Arc<dyn RateLimiter> = match components.rate_limiter {
            Some(limiter) => limiter,
            None => Arc::new(SlidingWindowRateLimiter::new(config.rate_limit.clone())),
        };
        let detector: Arc<dyn InvalidationDetector> = match components.detector {
            Some(detector) => detector,
            None => Arc::new(StatusFieldDetector::new(&config.invalidation)),
        };
        let health_probe: Arc<dyn HealthProbe> = match components.health_probe {
            Some(probe) => probe,
            None => Arc::new(ExpiryHealthProbe),
        };
        let refresher = Arc::new(
            SingleFlightRefresher::new(acquirer, store).with_metrics(metrics.clone()),
        );

        Self {
            rate_limiter,
            circuit_breaker: SessionCircuitBreaker::new(config.circuit_breaker.clone()),
            retry: BackoffRetryExecutor::new(config.retry.clone()),
            cache: ResponseCache::new(config.cache.clone()),
            detector,
            health_probe,
            scheduler: Mutex::new(None),
            config,
            transport,
            refresher,
            metrics,
        }
    }

    pub fn config(&self) -> &SessionAuthConfig {
        &self.config
    }

    /// Start the proactive refresh scheduler when enabled. Idempotent.
    pub fn start(&self) {
        if !self.config.refresh.scheduler_enabled {
            debug!("refresh scheduler disabled");
            return;
        }

        let mut scheduler = self.lock_scheduler();
        if scheduler.is_none() {
            let created = ProactiveRefreshScheduler::with_components(
                self.refresher.clone(),
                self.config.credentials.clone(),
                self.config.refresh.clone(),
                Arc::new(RandomJitter),
                self.health_probe.clone(),
            );
            created.start();
            *scheduler = Some(created);
        }
    }

    /// Stop background work. Requests keep working with on-demand refresh.
    pub fn shutdown(&self) {
        if let Some(scheduler) = self.lock_scheduler().take() {
            scheduler.stop();
        }
        info!("resilient client shut down");
    }

    /// Whether the refresh scheduler is running.
    pub fn is_scheduler_running(&self) -> bool {
        self.lock_scheduler()
            .as_ref()
            .map(ProactiveRefreshScheduler::is_running)
            .unwrap_or(false)
    }

    /// Current token for this client's identity, if one is held.
    pub fn current_token(&self) -> Option<TokenInfo> {
        self.refresher
            .current_token(&self.config.credentials.identity())
    }

    /// Discard the current token; the next request re-authenticates.
    pub fn invalidate_token(&self) -> bool {
        self.refresher.invalidate(&self.config.credentials.identity())
    }

    /// Shared refresher, for wiring additional schedulers.
    pub fn refresher(&self) -> &Arc<SingleFlightRefresher> {
        &self.refresher
    }

    /// Response cache.
    pub fn cache(&self) -> &ResponseCache<ApiResponse> {
        &self.cache
    }

    /// Circuit breaker state.
    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    /// GET an endpoint.
    pub async fn get(&self, endpoint: &str) -> SessionAuthResult<ApiResponse> {
        self.request(endpoint, RequestOptions::get()).await
    }

    /// POST a JSON body to an endpoint.
    pub async fn post_json(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> SessionAuthResult<ApiResponse> {
        self.request(endpoint, RequestOptions::post_json(body)).await
    }

    /// Execute a request against `endpoint` (relative to the base URL).
    pub async fn request(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> SessionAuthResult<ApiResponse> {
        let started = Instant::now();
        let result = self.execute_request(endpoint, &options).await;

        let outcome = match &result {
            Ok(response) if response.from_cache => "cache_hit",
            Ok(_) => "success",
            Err(error) => error.error_code(),
        };
        self.metrics
            .record_request(endpoint, outcome, started.elapsed());
        self.metrics
            .record_circuit_state(&self.circuit_breaker.state().to_string());

        if let Err(error) = &result {
            warn!(endpoint, error = %error, "request failed");
        }
        result
    }

    async fn execute_request(
        &self,
        endpoint: &str,
        options: &RequestOptions,
    ) -> SessionAuthResult<ApiResponse> {
        let cacheable = options.is_cacheable();
        let key = cache_key(options.method, endpoint, &options.body_string());

        if cacheable {
            let hit = self.cache.get(&key);
            self.metrics.record_cache_lookup(hit.is_some());
            if let Some(mut response) = hit {
                debug!(endpoint, "served from cache");
                response.from_cache = true;
                return Ok(response);
            }
        }

        let reauthenticated = AtomicBool::new(false);
        let response = self
            .retry
            .execute(|attempt| self.attempt(endpoint, options, attempt, &reauthenticated))
            .await?;

        if cacheable {
            let ttl = options.cache_ttl.unwrap_or_else(|| self.cache.default_ttl());
            self.cache.insert_with_ttl(key, response.clone(), ttl);
        }
        Ok(response)
    }

    /// One retry-executor attempt, including at most one forced re-authentication
    /// per request across all attempts.
    async fn attempt(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        attempt: u32,
        reauthenticated: &AtomicBool,
    ) -> SessionAuthResult<ApiResponse> {
        let identity = self.config.credentials.identity();

        loop {
            let waiting = Instant::now();
            self.rate_limiter.acquire().await;
            self.metrics.record_rate_limit_wait(waiting.elapsed());

            let token = self
                .refresher
                .get_valid_token(&self.config.credentials)
                .await
                .map_err(authentication_required)?;

            debug!(endpoint, attempt, "sending upstream request");
            let response = self
                .circuit_breaker
                .execute(|| self.send(endpoint, options, &token))
                .await?;

            if self.is_auth_rejection(&response) {
                if reauthenticated.swap(true, Ordering::SeqCst) {
                    return Err(SessionAuthError::Authentication(AuthenticationError::Expired));
                }
                warn!(
                    endpoint,
                    status = response.status,
                    "credential rejected by upstream, re-authenticating"
                );
                self.metrics.record_reauthentication(endpoint);
                self.refresher.invalidate_if_current(&identity, &token);
                continue;
            }

            if !response.is_success() {
                return Err(error_from_response(&response));
            }

            return Ok(ApiResponse {
                status: response.status,
                headers: response.headers,
                body: response.body,
                from_cache: false,
            });
        }
    }

    /// Send one authenticated call. 5xx and transport faults are breaker failures.
    async fn send(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        token: &TokenInfo,
    ) -> SessionAuthResult<HttpResponse> {
        let mut request = HttpRequest::new(options.method, join_url(&self.config.base_url, endpoint))
            .with_timeout(options.timeout.unwrap_or(self.config.timeout));
        if let Some(body) = &options.body {
            request = request.json_body(body.to_string());
        }
        request
            .headers
            .insert("accept".to_string(), "application/json".to_string());
        for (name, value) in &options.headers {
            request.headers.insert(name.to_lowercase(), value.clone());
        }
        let request = self.config.secondary_placement.apply(request, token);

        let response = self.transport.send(request).await?;
        if response.status >= 500 {
            return Err(create_error_from_response(response.status, &response.body));
        }
        Ok(response)
    }

    fn is_auth_rejection(&self, response: &HttpResponse) -> bool {
        matches!(response.status, 401 | 403)
            || (response.is_success() && self.detector.is_invalidated(&response.body))
    }

    fn lock_scheduler(&self) -> std::sync::MutexGuard<'_, Option<ProactiveRefreshScheduler>> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: HttpTransport + 'static> Drop for ResilientClient<T> {
    fn drop(&mut self) {
        if let Some(scheduler) = self.lock_scheduler().take() {
            scheduler.stop();
        }
    }
}

/// Token unavailability fails the request hard; timeouts stay typed.
fn authentication_required(error: SessionAuthError) -> SessionAuthError {
    if error.is_timeout() {
        return error;
    }
    SessionAuthError::Authentication(AuthenticationError::Required {
        message: error.to_string(),
    })
}

fn error_from_response(response: &HttpResponse) -> SessionAuthError {
    if response.status == 429 {
        let retry_after = response
            .headers
            .get("retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return SessionAuthError::Upstream(UpstreamError::RateLimited { retry_after });
    }
    create_error_from_response(response.status, &response.body)
}

/// Build a client from a configuration using the default transport.
pub fn create_client(config: SessionAuthConfig) -> SessionAuthResult<ResilientClient> {
    ResilientClient::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::session_auth_config;
    use crate::core::MockHttpTransport;
    use crate::error::NetworkError;
    use crate::resilience::RetryConfig;
    use crate::telemetry::InMemoryMetrics;
    use crate::token::MockTokenAcquirer;
    use crate::types::SecondaryCredentialPlacement;
    use serde_json::json;

    fn config() -> SessionAuthConfig {
        session_auth_config()
            .base_url("https://api.example.com")
            .credentials("alice", "secret")
            .retry(RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
            })
            .circuit_breaker(3, Duration::from_secs(30))
            .scheduler_enabled(false)
            .build()
            .unwrap()
    }

    fn client_with(
        config: SessionAuthConfig,
        transport: MockHttpTransport,
    ) -> (ResilientClient<MockHttpTransport>, Arc<MockTokenAcquirer>, Arc<InMemoryMetrics>) {
        let acquirer = Arc::new(MockTokenAcquirer::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        let client = ResilientClient::with_components(
            config,
            transport,
            ClientComponents {
                acquirer: Some(acquirer.clone()),
                metrics: Some(metrics.clone()),
                ..Default::default()
            },
        );
        (client, acquirer, metrics)
    }

    #[tokio::test]
    async fn test_request_attaches_credentials() {
        let transport = MockHttpTransport::new();
        transport.queue_json_response(200, &json!({"items": []}));
        let (client, acquirer, _) = client_with(config(), transport);

        let response = client.get("/v1/items").await.unwrap();
        assert_eq!(response.status, 200);
        assert!(!response.from_cache);
        assert_eq!(acquirer.call_count(), 1);

        let request = client.transport.get_last_request().unwrap();
        assert_eq!(request.url, "https://api.example.com/v1/items");
        assert_eq!(request.headers["authorization"], "Bearer mock-bearer-1");
        assert_eq!(request.headers["x-api-token"], "mock-secondary-1");
    }

    #[tokio::test]
    async fn test_secondary_credential_in_path() {
        let transport = MockHttpTransport::new();
        transport.queue_json_response(200, &json!({}));
        let mut config = config();
        config.secondary_placement = SecondaryCredentialPlacement::PathTemplate {
            placeholder: "{apiToken}".to_string(),
        };
        let (client, _, _) = client_with(config, transport);

        client.get("/v1/{apiToken}/items").await.unwrap();
        let request = client.transport.get_last_request().unwrap();
        assert_eq!(request.url, "https://api.example.com/v1/mock-secondary-1/items");
    }

    #[tokio::test]
    async fn test_invalidation_in_ok_body_reauthenticates_once() {
        let transport = MockHttpTransport::new();
        transport.queue_json_response(200, &json!({"status": "INVALID SECURITY TOKEN"}));
        transport.queue_json_response(200, &json!({"status": "OK", "count": 7}));
        let (client, acquirer, metrics) = client_with(config(), transport);

        let response = client.get("/v1/search").await.unwrap();
        let body: serde_json::Value = response.json().unwrap();

        assert_eq!(body["count"], 7);
        assert_eq!(acquirer.call_count(), 2);
        assert_eq!(client.transport.count_requests("/v1/search"), 2);
        assert_eq!(metrics.count("session_reauthentications_total"), 1);
        assert_eq!(
            client.transport.get_last_request().unwrap().headers["authorization"],
            "Bearer mock-bearer-2"
        );
    }

    #[tokio::test]
    async fn test_persistent_rejection_is_expired() {
        let transport = MockHttpTransport::new();
        transport.set_default_response(HttpResponse::new(401, ""));
        let (client, acquirer, _) = client_with(config(), transport);

        let error = client.get("/v1/search").await.unwrap_err();
        assert!(matches!(
            error,
            SessionAuthError::Authentication(AuthenticationError::Expired)
        ));
        assert_eq!(acquirer.call_count(), 2);
        assert_eq!(client.transport.count_requests("/v1/search"), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_upstream() {
        let transport = MockHttpTransport::new();
        transport.queue_json_response(200, &json!({"n": 1}));
        let (client, _, metrics) = client_with(config(), transport);

        let first = client.get("/v1/items").await.unwrap();
        let second = client.get("/v1/items").await.unwrap();

        assert_eq!(first.body, second.body);
        assert!(second.from_cache);
        assert_eq!(client.transport.count_requests("/v1/items"), 1);
        assert_eq!(
            metrics.count_with_label("session_cache_lookups_total", "result", "hit"),
            1
        );
    }

    #[tokio::test]
    async fn test_mutating_requests_are_not_cached() {
        let transport = MockHttpTransport::new();
        transport.set_default_response(HttpResponse::new(200, "{}"));
        let (client, _, _) = client_with(config(), transport);

        client.post_json("/v1/orders", json!({"id": 1})).await.unwrap();
        client.post_json("/v1/orders", json!({"id": 1})).await.unwrap();
        assert_eq!(client.transport.count_requests("/v1/orders"), 2);

        let read = RequestOptions::post_json(json!({"q": "x"})).read_only();
        client.request("/v1/search", read.clone()).await.unwrap();
        client.request("/v1/search", read).await.unwrap();
        assert_eq!(client.transport.count_requests("/v1/search"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_are_retried_with_backoff() {
        let transport = MockHttpTransport::new();
        transport.queue_response(HttpResponse::new(503, "busy"));
        transport.queue_response(HttpResponse::new(502, "busy"));
        transport.queue_json_response(200, &json!({"ok": true}));
        let (client, _, _) = client_with(config(), transport);

        let started = Instant::now();
        let response = client.request("/v1/items", RequestOptions::get().no_cache()).await;

        assert!(response.is_ok());
        assert_eq!(client.transport.count_requests("/v1/items"), 3);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_surfaces_last_error() {
        let transport = MockHttpTransport::new();
        transport.set_default_response(HttpResponse::new(500, "boom"));
        let (client, _, _) = client_with(config(), transport);

        let error = client.get("/v1/items").await.unwrap_err();
        assert!(matches!(
            error,
            SessionAuthError::Upstream(UpstreamError::ServerError { status: 500, .. })
        ));
        assert_eq!(client.transport.count_requests("/v1/items"), 3);
        assert_eq!(client.circuit_state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let transport = MockHttpTransport::new();
        transport.set_default_response(HttpResponse::new(200, "{}"));
        let mut config = config();
        config.retry.max_attempts = 1;
        let (client, _, _) = client_with(config, transport);

        for _ in 0..3 {
            client.transport.queue_response(HttpResponse::new(500, ""));
            assert!(client.request("/v1/x", RequestOptions::get().no_cache()).await.is_err());
        }
        client.transport.clear_history();

        let error = client.get("/v1/x").await.unwrap_err();
        assert!(matches!(error, SessionAuthError::Network(NetworkError::CircuitOpen)));
        assert_eq!(client.transport.count_requests("/v1/x"), 0);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let transport = MockHttpTransport::new();
        transport.set_default_response(HttpResponse::new(404, "missing"));
        let (client, _, _) = client_with(config(), transport);

        let error = client.get("/v1/missing").await.unwrap_err();
        assert!(matches!(
            error,
            SessionAuthError::Upstream(UpstreamError::ClientError { status: 404, .. })
        ));
        assert_eq!(client.transport.count_requests("/v1/missing"), 1);
        assert_eq!(client.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_failed_login_is_authentication_required() {
        let transport = MockHttpTransport::new();
        let (client, acquirer, _) = client_with(config(), transport);
        acquirer.queue_error(SessionAuthError::Authentication(AuthenticationError::Failed {
            message: "bad password".to_string(),
        }));

        let error = client.get("/v1/items").await.unwrap_err();
        assert!(matches!(
            error,
            SessionAuthError::Authentication(AuthenticationError::Required { .. })
        ));
        assert_eq!(client.transport.count_requests("/v1/items"), 0);
    }

    #[tokio::test]
    async fn test_rate_limited_response_carries_retry_after() {
        let mut response = HttpResponse::new(429, "");
        response
            .headers
            .insert("retry-after".to_string(), "7".to_string());
        assert_eq!(
            error_from_response(&response).retry_after(),
            Some(Duration::from_secs(7))
        );
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let transport = MockHttpTransport::new();
        transport.set_default_response(HttpResponse::new(200, "{}"));
        let mut config = config();
        config.refresh.scheduler_enabled = true;
        let (client, _, _) = client_with(config, transport);

        client.start();
        assert!(client.is_scheduler_running());
        client.get("/v1/items").await.unwrap();
        assert!(client.current_token().is_some());

        assert!(client.invalidate_token());
        assert!(client.current_token().is_none());

        client.shutdown();
        assert!(!client.is_scheduler_running());
    }
}
