//! Token Acquisition
//!
//! The login exchange that produces a new [`TokenInfo`].

use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::core::{HttpMethod, HttpRequest, HttpTransport};
use crate::error::{create_error_from_response, AuthenticationError, SessionAuthError};
use crate::token::decode::decode_login_response;
use crate::types::{join_url, Credentials, RefreshConfig, TokenInfo};

/// Token acquirer interface.
#[async_trait]
pub trait TokenAcquirer: Send + Sync {
    /// Perform one acquisition for `credentials`. Never retries.
    async fn acquire(&self, credentials: &Credentials) -> Result<TokenInfo, SessionAuthError>;
}

/// Direct login against the upstream login endpoint.
pub struct LoginTokenAcquirer<T: HttpTransport + ?Sized> {
    transport: Arc<T>,
    login_path: String,
    timeout: Duration,
    refresh: RefreshConfig,
}

impl<T: HttpTransport + ?Sized> LoginTokenAcquirer<T> {
    /// Create new login acquirer.
    pub fn new(
        transport: Arc<T>,
        login_path: impl Into<String>,
        timeout: Duration,
        refresh: RefreshConfig,
    ) -> Self {
        Self {
            transport,
            login_path: login_path.into(),
            timeout,
            refresh,
        }
    }

    fn build_request(&self, credentials: &Credentials) -> HttpRequest {
        let body = serde_json::json!({
            "username": credentials.username,
            "password": credentials.password.expose_secret(),
        });

        let mut request = HttpRequest::new(
            HttpMethod::Post,
            join_url(&credentials.base_url, &self.login_path),
        )
        .json_body(body.to_string())
        .with_timeout(self.timeout);
        request
            .headers
            .insert("accept".to_string(), "application/json".to_string());
        request
    }
}

#[async_trait]
impl<T: HttpTransport + ?Sized> TokenAcquirer for LoginTokenAcquirer<T> {
    async fn acquire(&self, credentials: &Credentials) -> Result<TokenInfo, SessionAuthError> {
        let request = self.build_request(credentials);
        debug!(identity = %credentials.identity(), url = %request.url, "logging in");

        let response = self.transport.send(request).await?;

        match response.status {
            200..=299 => {}
            401 | 403 => {
                return Err(SessionAuthError::Authentication(AuthenticationError::Failed {
                    message: format!("login rejected (HTTP {})", response.status),
                }))
            }
            status => return Err(create_error_from_response(status, &response.body)),
        }

        Ok(decode_login_response(&response.body)?.into_token(&self.refresh))
    }
}

/// Mock acquirer for testing.
///
/// Returns queued results in order, then a fresh default token per call.
pub struct MockTokenAcquirer {
    results: Mutex<VecDeque<Result<TokenInfo, SessionAuthError>>>,
    calls: AtomicUsize,
    latency: Mutex<Option<Duration>>,
    lifetime: Duration,
    refresh_buffer: Duration,
}

impl MockTokenAcquirer {
    /// Create new mock acquirer issuing 50-minute tokens.
    pub fn new() -> Self {
        let refresh = RefreshConfig::default();
        Self {
            results: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            latency: Mutex::new(None),
            lifetime: refresh.assumed_lifetime,
            refresh_buffer: refresh.refresh_buffer,
        }
    }

    /// Lifetime and buffer for default tokens.
    pub fn with_lifetime(mut self, lifetime: Duration, refresh_buffer: Duration) -> Self {
        self.lifetime = lifetime;
        self.refresh_buffer = refresh_buffer;
        self
    }

    /// Queue a token to return.
    pub fn queue_token(&self, token: TokenInfo) -> &Self {
        self.lock_results().push_back(Ok(token));
        self
    }

    /// Queue an error to return.
    pub fn queue_error(&self, error: SessionAuthError) -> &Self {
        self.lock_results().push_back(Err(error));
        self
    }

    /// Delay every acquisition.
    pub fn set_latency(&self, latency: Duration) -> &Self {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = Some(latency);
        self
    }

    /// Number of acquisitions performed.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock_results(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Result<TokenInfo, SessionAuthError>>> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockTokenAcquirer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenAcquirer for MockTokenAcquirer {
    async fn acquire(&self, _credentials: &Credentials) -> Result<TokenInfo, SessionAuthError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let queued = self.lock_results().pop_front();
        queued.unwrap_or_else(|| {
            Ok(TokenInfo::issued_now(
                format!("mock-bearer-{}", call),
                format!("mock-secondary-{}", call),
                self.lifetime,
                self.refresh_buffer,
            ))
        })
    }
}

/// Create login acquirer.
pub fn create_login_acquirer<T: HttpTransport + ?Sized>(
    transport: Arc<T>,
    login_path: impl Into<String>,
    timeout: Duration,
    refresh: RefreshConfig,
) -> LoginTokenAcquirer<T> {
    LoginTokenAcquirer::new(transport, login_path, timeout, refresh)
}

/// Create mock acquirer for testing.
pub fn create_mock_acquirer() -> MockTokenAcquirer {
    MockTokenAcquirer::new()
}
