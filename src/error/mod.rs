//! Session Auth Error Types
//!
//! Error hierarchy for the authentication and access layer.
//!
//! Every fault that reaches a caller is one of these structured values; raw
//! transport exceptions are converted at the transport boundary. The split lets
//! calling code tell "try again later" (`is_retryable`) apart from "fix the
//! configuration" (`Configuration`, `Authentication::Failed`).

use std::time::Duration;
use thiserror::Error;

/// Root error type for the session auth integration.
#[derive(Error, Debug, Clone)]
pub enum SessionAuthError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthenticationError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),
}

impl SessionAuthError {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "SESSION_CONFIG",
            Self::Authentication(_) => "SESSION_AUTH",
            Self::Network(NetworkError::CircuitOpen) => "SESSION_CIRCUIT_OPEN",
            Self::Network(NetworkError::Timeout { .. }) => "SESSION_TIMEOUT",
            Self::Network(_) => "SESSION_NETWORK",
            Self::Upstream(_) => "SESSION_UPSTREAM",
            Self::Protocol(_) => "SESSION_PROTOCOL",
            Self::Webhook(_) => "SESSION_WEBHOOK",
        }
    }

    /// Check if error is transient and worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_retryable(),
            Self::Upstream(UpstreamError::ServerError { .. }) => true,
            Self::Upstream(UpstreamError::RateLimited { .. }) => true,
            _ => false,
        }
    }

    /// Get retry-after duration if applicable.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Upstream(UpstreamError::RateLimited { retry_after }) => *retry_after,
            _ => None,
        }
    }

    /// Check if error requires re-authentication.
    pub fn needs_reauth(&self) -> bool {
        matches!(
            self,
            Self::Authentication(AuthenticationError::Expired)
                | Self::Authentication(AuthenticationError::Required { .. })
        )
    }

    /// Check if error is a typed timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Network(NetworkError::Timeout { .. }) | Self::Webhook(WebhookError::Timeout { .. })
        )
    }
}

/// Configuration error.
#[derive(Error, Debug, Clone)]
pub enum ConfigurationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid URL: {url}")]
    InvalidUrl { url: String },
}

/// Authentication error.
#[derive(Error, Debug, Clone)]
pub enum AuthenticationError {
    /// Bad credentials or a failed login exchange.
    #[error("Authentication failed: {message}")]
    Failed { message: String },

    /// Login response carried no recognizable credential fields.
    #[error("Invalid login response shape: {message}")]
    InvalidResponseShape { message: String },

    /// Upstream signalled that the credential in use is no longer valid.
    #[error("Authentication expired")]
    Expired,

    /// No valid credential could be obtained for a request.
    #[error("Authentication required: {message}")]
    Required { message: String },
}

/// Network/transport error.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("DNS resolution failed: {host}")]
    DnsResolutionFailed { host: String },

    #[error("Circuit breaker is open")]
    CircuitOpen,
}

impl NetworkError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::CircuitOpen)
    }
}

/// Non-success response from the upstream API.
#[derive(Error, Debug, Clone)]
pub enum UpstreamError {
    #[error("Upstream server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Upstream rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Upstream rejected request (HTTP {status}): {message}")]
    ClientError { status: u16, message: String },
}

/// Protocol/response parsing error.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Response too large: {size} bytes")]
    ResponseTooLarge { size: usize },

    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String },
}

/// Webhook bridge error.
#[derive(Error, Debug, Clone)]
pub enum WebhookError {
    /// No fresh credential appeared within the polling bound on any attempt.
    #[error("Webhook authentication timed out after {attempts} attempts ({waited:?})")]
    Timeout { attempts: u32, waited: Duration },
}

/// Result type for session auth operations.
pub type SessionAuthResult<T> = Result<T, SessionAuthError>;

/// Create error from a non-success HTTP response.
pub fn create_error_from_response(status: u16, body: &str) -> SessionAuthError {
    let message = summarize_body(body);

    let error = match status {
        429 => UpstreamError::RateLimited { retry_after: None },
        500..=599 => UpstreamError::ServerError { status, message },
        _ => UpstreamError::ClientError { status, message },
    };

    SessionAuthError::Upstream(error)
}

fn summarize_body(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty body".to_string();
    }
    trimmed.chars().take(MAX).collect()
}
