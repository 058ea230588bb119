//! Configuration Builder
//!
//! Fluent builder for the access-layer configuration.

use std::time::Duration;
use url::Url;

use crate::error::{ConfigurationError, SessionAuthError};
use crate::resilience::{CacheConfig, CircuitBreakerConfig, RateLimiterConfig, RetryConfig};
use crate::types::{
    Credentials, InvalidationConfig, RefreshConfig, SecondaryCredentialPlacement,
    SessionAuthConfig, WebhookConfig, DEFAULT_LOGIN_PATH, DEFAULT_TIMEOUT_SECS,
};

/// Session auth configuration builder.
#[derive(Default)]
pub struct SessionAuthConfigBuilder {
    base_url: Option<String>,
    login_path: Option<String>,
    username: Option<String>,
    password: Option<String>,
    timeout: Option<Duration>,
    refresh: RefreshConfig,
    rate_limit: RateLimiterConfig,
    circuit_breaker: CircuitBreakerConfig,
    cache: CacheConfig,
    retry: RetryConfig,
    secondary_placement: SecondaryCredentialPlacement,
    invalidation: InvalidationConfig,
    webhook_trigger_url: Option<String>,
    webhook_poll_url: Option<String>,
    webhook: WebhookConfig,
}

impl SessionAuthConfigBuilder {
    /// Create new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set upstream base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set login path relative to the base URL.
    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = Some(path.into());
        self
    }

    /// Set the credential pair.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how long before expiry a token is refreshed.
    pub fn refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh.refresh_buffer = buffer;
        self
    }

    /// Set the lifetime assumed when the login response carries none.
    pub fn assumed_lifetime(mut self, lifetime: Duration) -> Self {
        self.refresh.assumed_lifetime = lifetime;
        self
    }

    /// Set the refresh jitter window.
    pub fn jitter_window(mut self, window: Duration) -> Self {
        self.refresh.jitter_window = window;
        self
    }

    /// Set the health-check interval.
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.refresh.health_check_interval = interval;
        self
    }

    /// Enable or disable the proactive refresh scheduler.
    pub fn scheduler_enabled(mut self, enabled: bool) -> Self {
        self.refresh.scheduler_enabled = enabled;
        self
    }

    /// Replace the whole refresh configuration.
    pub fn refresh(mut self, refresh: RefreshConfig) -> Self {
        self.refresh = refresh;
        self
    }

    /// Set rate limit quota.
    pub fn rate_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.rate_limit = RateLimiterConfig {
            max_requests,
            window,
        };
        self
    }

    /// Set circuit breaker thresholds.
    pub fn circuit_breaker(mut self, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        self.circuit_breaker = CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout,
        };
        self
    }

    /// Set cache TTL and size bound.
    pub fn cache(mut self, default_ttl: Duration, max_entries: usize) -> Self {
        self.cache = CacheConfig {
            default_ttl,
            max_entries,
        };
        self
    }

    /// Set request retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set where the secondary credential travels.
    pub fn secondary_placement(mut self, placement: SecondaryCredentialPlacement) -> Self {
        self.secondary_placement = placement;
        self
    }

    /// Set invalidation matching rules.
    pub fn invalidation(mut self, invalidation: InvalidationConfig) -> Self {
        self.invalidation = invalidation;
        self
    }

    /// Add an invalidation marker substring.
    pub fn add_invalidation_marker(mut self, marker: impl Into<String>) -> Self {
        self.invalidation.markers.push(marker.into());
        self
    }

    /// Acquire tokens through the webhook bridge instead of direct login.
    pub fn webhook(mut self, trigger_url: impl Into<String>, poll_url: impl Into<String>) -> Self {
        self.webhook_trigger_url = Some(trigger_url.into());
        self.webhook_poll_url = Some(poll_url.into());
        self
    }

    /// Set webhook polling bounds.
    pub fn webhook_polling(
        mut self,
        poll_interval: Duration,
        max_wait: Duration,
        max_retries: u32,
    ) -> Self {
        self.webhook.poll_interval = poll_interval;
        self.webhook.max_wait = max_wait;
        self.webhook.max_retries = max_retries;
        self
    }

    /// Load configuration from `UPSTREAM_*` environment variables.
    ///
    /// Unset or unparsable variables leave the current value in place.
    pub fn from_env(self) -> Self {
        self.apply_env(|name| std::env::var(name).ok())
    }

    fn apply_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |name: &str| var(name).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(url) = var("UPSTREAM_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Some(path) = var("UPSTREAM_LOGIN_PATH") {
            self.login_path = Some(path);
        }
        if let Some(username) = var("UPSTREAM_USERNAME") {
            self.username = Some(username);
        }
        if let Some(password) = var("UPSTREAM_PASSWORD") {
            self.password = Some(password);
        }
        if let Some(s) = secs("UPSTREAM_TIMEOUT_SECS") {
            self.timeout = Some(Duration::from_secs(s));
        }

        // Refresh
        if let Some(s) = secs("UPSTREAM_REFRESH_BUFFER_SECS") {
            self.refresh.refresh_buffer = Duration::from_secs(s);
        }
        if let Some(s) = secs("UPSTREAM_ASSUMED_LIFETIME_SECS") {
            self.refresh.assumed_lifetime = Duration::from_secs(s);
        }
        if let Some(s) = secs("UPSTREAM_JITTER_SECS") {
            self.refresh.jitter_window = Duration::from_secs(s);
        }
        if let Some(s) = secs("UPSTREAM_HEALTH_CHECK_SECS") {
            self.refresh.health_check_interval = Duration::from_secs(s);
        }
        if let Some(v) = var("UPSTREAM_SCHEDULER_ENABLED") {
            self.refresh.scheduler_enabled = v.to_lowercase() != "false";
        }

        // Rate limit
        if let Some(max) = var("UPSTREAM_RATE_LIMIT_MAX").and_then(|v| v.trim().parse().ok()) {
            self.rate_limit.max_requests = max;
        }
        if let Some(s) = secs("UPSTREAM_RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit.window = Duration::from_secs(s);
        }

        // Circuit breaker
        if let Some(threshold) =
            var("UPSTREAM_BREAKER_THRESHOLD").and_then(|v| v.trim().parse().ok())
        {
            self.circuit_breaker.failure_threshold = threshold;
        }
        if let Some(s) = secs("UPSTREAM_BREAKER_RECOVERY_SECS") {
            self.circuit_breaker.recovery_timeout = Duration::from_secs(s);
        }

        // Cache
        if let Some(s) = secs("UPSTREAM_CACHE_TTL_SECS") {
            self.cache.default_ttl = Duration::from_secs(s);
        }
        if let Some(max) = var("UPSTREAM_CACHE_MAX_ENTRIES").and_then(|v| v.trim().parse().ok()) {
            self.cache.max_entries = max;
        }

        // Webhook
        if let Some(url) = var("UPSTREAM_WEBHOOK_TRIGGER_URL") {
            self.webhook_trigger_url = Some(url);
        }
        if let Some(url) = var("UPSTREAM_WEBHOOK_POLL_URL") {
            self.webhook_poll_url = Some(url);
        }
        if let Some(s) = secs("UPSTREAM_WEBHOOK_POLL_INTERVAL_SECS") {
            self.webhook.poll_interval = Duration::from_secs(s);
        }
        if let Some(s) = secs("UPSTREAM_WEBHOOK_MAX_WAIT_SECS") {
            self.webhook.max_wait = Duration::from_secs(s);
        }
        if let Some(retries) =
            var("UPSTREAM_WEBHOOK_MAX_RETRIES").and_then(|v| v.trim().parse().ok())
        {
            self.webhook.max_retries = retries;
        }

        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<SessionAuthConfig, SessionAuthError> {
        let base_url = self.base_url.ok_or_else(|| missing("base_url"))?;
        validate_url(&base_url)?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let username = self.username.ok_or_else(|| missing("username"))?;
        let password = self.password.ok_or_else(|| missing("password"))?;

        if self.rate_limit.max_requests == 0 {
            return Err(invalid("rate_limit.max_requests", "must be at least 1"));
        }
        if self.rate_limit.window.is_zero() {
            return Err(invalid("rate_limit.window", "must be non-zero"));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(invalid("circuit_breaker.failure_threshold", "must be at least 1"));
        }
        if self.refresh.assumed_lifetime <= self.refresh.refresh_buffer {
            return Err(invalid(
                "refresh.assumed_lifetime",
                "must exceed the refresh buffer",
            ));
        }
        if self.refresh.health_check_interval.is_zero() {
            return Err(invalid("refresh.health_check_interval", "must be non-zero"));
        }

        let webhook = match (self.webhook_trigger_url, self.webhook_poll_url) {
            (Some(trigger_url), Some(poll_url)) => {
                validate_url(&trigger_url)?;
                validate_url(&poll_url)?;
                Some(WebhookConfig {
                    trigger_url,
                    poll_url,
                    ..self.webhook
                })
            }
            (Some(_), None) => return Err(missing("webhook.poll_url")),
            (None, Some(_)) => return Err(missing("webhook.trigger_url")),
            (None, None) => None,
        };

        Ok(SessionAuthConfig {
            credentials: Credentials::new(username, password, base_url.clone()),
            base_url,
            login_path: self
                .login_path
                .unwrap_or_else(|| DEFAULT_LOGIN_PATH.to_string()),
            timeout: self
                .timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            refresh: self.refresh,
            rate_limit: self.rate_limit,
            circuit_breaker: self.circuit_breaker,
            cache: self.cache,
            retry: self.retry,
            secondary_placement: self.secondary_placement,
            invalidation: self.invalidation,
            webhook,
        })
    }
}

fn validate_url(value: &str) -> Result<(), SessionAuthError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(SessionAuthError::Configuration(ConfigurationError::InvalidUrl {
            url: value.to_string(),
        })),
    }
}

fn missing(field: &str) -> SessionAuthError {
    SessionAuthError::Configuration(ConfigurationError::MissingField {
        field: field.to_string(),
    })
}

fn invalid(field: &str, message: &str) -> SessionAuthError {
    SessionAuthError::Configuration(ConfigurationError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    })
}

/// Create a new session auth configuration builder.
pub fn session_auth_config() -> SessionAuthConfigBuilder {
    SessionAuthConfigBuilder::new()
}
