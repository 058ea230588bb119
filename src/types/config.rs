//! Configuration Types
//!
//! Client configuration for the authentication and access layer.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::time::Duration;

use crate::core::HttpRequest;
use crate::resilience::{CacheConfig, CircuitBreakerConfig, RateLimiterConfig, RetryConfig};
use crate::types::{Credentials, TokenInfo};

/// Top-level client configuration.
#[derive(Clone, Debug)]
pub struct SessionAuthConfig {
    /// Upstream base URL (no trailing slash).
    pub base_url: String,
    /// Path of the login endpoint relative to `base_url`.
    pub login_path: String,
    /// Credential pair for the upstream identity.
    pub credentials: Credentials,
    /// Timeout applied to every outbound call.
    pub timeout: Duration,
    /// Token lifetime and proactive refresh settings.
    pub refresh: RefreshConfig,
    /// Outbound call quota.
    pub rate_limit: RateLimiterConfig,
    /// Failure isolation.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Read-call memoization.
    pub cache: CacheConfig,
    /// Request-level backoff retry.
    pub retry: RetryConfig,
    /// Where the secondary credential travels on data calls.
    pub secondary_placement: SecondaryCredentialPlacement,
    /// How 200-OK bodies signal token invalidation.
    pub invalidation: InvalidationConfig,
    /// Out-of-process acquisition; when set the webhook bridge replaces direct login.
    pub webhook: Option<WebhookConfig>,
}

impl SessionAuthConfig {
    /// Full login endpoint URL.
    pub fn login_url(&self) -> String {
        join_url(&self.base_url, &self.login_path)
    }
}

/// Token lifetime and proactive refresh settings.
#[derive(Clone, Debug)]
pub struct RefreshConfig {
    /// How long before expiry a token is considered due for refresh.
    pub refresh_buffer: Duration,
    /// Lifetime assumed when the login response carries none.
    pub assumed_lifetime: Duration,
    /// Upper bound of the random early offset applied to refresh timers.
    pub jitter_window: Duration,
    /// Floor for any computed refresh delay.
    pub minimum_delay: Duration,
    /// Fixed delay before retrying after a failed refresh.
    pub failure_retry_delay: Duration,
    /// Period of the health-check loop.
    pub health_check_interval: Duration,
    /// Whether `ResilientClient::start` spawns the scheduler.
    pub scheduler_enabled: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            refresh_buffer: Duration::from_secs(5 * 60),
            assumed_lifetime: Duration::from_secs(50 * 60),
            jitter_window: Duration::from_secs(2 * 60),
            minimum_delay: Duration::from_secs(30),
            failure_retry_delay: Duration::from_secs(5 * 60),
            health_check_interval: Duration::from_secs(10 * 60),
            scheduler_enabled: true,
        }
    }
}

/// Characters left as-is when a credential becomes a single path segment.
const PATH_SEGMENT_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Placement of the secondary credential on authenticated data calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecondaryCredentialPlacement {
    /// Sent as a request header with the given name.
    Header { name: String },
    /// Substituted into the endpoint path wherever `placeholder` appears,
    /// percent-encoded as one path segment.
    PathTemplate { placeholder: String },
}

impl Default for SecondaryCredentialPlacement {
    fn default() -> Self {
        Self::Header {
            name: "x-api-token".to_string(),
        }
    }
}

impl SecondaryCredentialPlacement {
    /// Attach the bearer header and place the secondary credential.
    pub fn apply(&self, mut request: HttpRequest, token: &TokenInfo) -> HttpRequest {
        request
            .headers
            .insert("authorization".to_string(), token.authorization_header());

        match self {
            Self::Header { name } => {
                request
                    .headers
                    .insert(name.to_lowercase(), token.secondary_credential().to_string());
            }
            Self::PathTemplate { placeholder } => {
                let segment =
                    utf8_percent_encode(token.secondary_credential(), PATH_SEGMENT_SET).to_string();
                request.url = request.url.replace(placeholder.as_str(), &segment);
            }
        }

        request
    }
}

/// Matching rules for upstream invalidation signalled inside successful bodies.
#[derive(Clone, Debug)]
pub struct InvalidationConfig {
    /// JSON status fields to inspect (case-insensitive key match).
    pub status_fields: Vec<String>,
    /// Substrings marking an invalid token (case-insensitive).
    pub markers: Vec<String>,
    /// Also scan raw non-JSON bodies for markers.
    pub scan_raw_body: bool,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            status_fields: vec![
                "status".to_string(),
                "responsestatus".to_string(),
                "message".to_string(),
            ],
            markers: DEFAULT_INVALIDATION_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            scan_raw_body: true,
        }
    }
}

/// Known upstream invalidation markers. Not assumed complete.
pub const DEFAULT_INVALIDATION_MARKERS: &[&str] = &[
    "INVALID SECURITY TOKEN",
    "SECURITY TOKEN EXPIRED",
    "TOKEN EXPIRED",
    "INVALID TOKEN",
];

/// Webhook bridge settings.
#[derive(Clone, Debug)]
pub struct WebhookConfig {
    /// External workflow trigger URL (fire-and-forget).
    pub trigger_url: String,
    /// Local endpoint returning the most recently stored credential.
    pub poll_url: String,
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Maximum time to poll after one trigger.
    pub max_wait: Duration,
    /// Number of full trigger-and-poll cycles.
    pub max_retries: u32,
    /// Delay between cycles.
    pub retry_delay: Duration,
    /// How old an `authTime` may be and still count as fresh.
    pub freshness_window: Duration,
    /// Timeout for each trigger or poll call.
    pub request_timeout: Duration,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            trigger_url: String::new(),
            poll_url: String::new(),
            poll_interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(60),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            freshness_window: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Default configuration values.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Join a base URL and a path with exactly one slash.
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://api.example.com/", "/login"),
            "https://api.example.com/login"
        );
        assert_eq!(
            join_url("https://api.example.com", "v1/search"),
            "https://api.example.com/v1/search"
        );
        assert_eq!(
            join_url("https://api.example.com", "https://other.example.com/x"),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_secondary_placement() {
        let token = TokenInfo::issued_now(
            "bearer",
            "sec-123",
            Duration::from_secs(3000),
            Duration::from_secs(300),
        );
        let request = HttpRequest::new(
            crate::core::HttpMethod::Get,
            "https://api.example.com/{token}/search",
        );

        let header = SecondaryCredentialPlacement::default().apply(request.clone(), &token);
        assert_eq!(header.headers["authorization"], "Bearer bearer");
        assert_eq!(header.headers["x-api-token"], "sec-123");

        let path = SecondaryCredentialPlacement::PathTemplate {
            placeholder: "{token}".to_string(),
        }
        .apply(request, &token);
        assert_eq!(path.url, "https://api.example.com/sec-123/search");
        assert!(!path.headers.contains_key("x-api-token"));
    }

    #[test]
    fn test_path_credential_is_encoded_as_one_segment() {
        let token = TokenInfo::issued_now(
            "bearer",
            "a/b?c#d e%",
            Duration::from_secs(3000),
            Duration::from_secs(300),
        );
        let request = HttpRequest::new(
            crate::core::HttpMethod::Get,
            "https://api.example.com/{token}/search?q=1",
        );

        let placed = SecondaryCredentialPlacement::PathTemplate {
            placeholder: "{token}".to_string(),
        }
        .apply(request, &token);
        assert_eq!(
            placed.url,
            "https://api.example.com/a%2Fb%3Fc%23d%20e%25/search?q=1"
        );

        let parsed = url::Url::parse(&placed.url).unwrap();
        assert_eq!(parsed.path_segments().unwrap().count(), 2);
        assert_eq!(parsed.query(), Some("q=1"));
        assert_eq!(parsed.fragment(), None);
    }

    #[test]
    fn test_refresh_defaults() {
        let config = RefreshConfig::default();
        assert_eq!(config.refresh_buffer, Duration::from_secs(300));
        assert_eq!(config.assumed_lifetime, Duration::from_secs(3000));
        assert!(config.assumed_lifetime > config.refresh_buffer);
    }
}
