//! Session Auth Integration Module
//!
//! Resilient authentication and access layer for upstream APIs that issue
//! short-lived session credentials.
//!
//! # Features
//!
//! - Direct login with tolerant response decoding
//! - Single-flight token acquisition per client identity
//! - Proactive, jittered refresh with self-healing health checks
//! - Re-authentication on 401/403 and on in-body invalidation markers
//! - Sliding-window rate limiting
//! - Circuit breaker around upstream calls
//! - Short-TTL response cache for idempotent reads
//! - Webhook bridge for credentials produced by an external workflow
//!
//! # Example
//!
//! ```rust,ignore
//! use session_auth_integration::{session_auth_config, ResilientClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = session_auth_config()
//!         .base_url("https://api.example.com")
//!         .credentials("service-user", "service-password")
//!         .build()?;
//!
//!     let client = ResilientClient::new(config)?;
//!     client.start();
//!
//!     let response = client.get("/v1/accounts").await?;
//!     println!("{}", response.body);
//!
//!     client.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: Configuration, credential and request types
//! - `error`: Error hierarchy
//! - `core`: HTTP transport and invalidation detection
//! - `resilience`: Rate limiter, circuit breaker, retry and response cache
//! - `token`: Token store, acquisition, single-flight refresh, scheduler, webhook bridge
//! - `telemetry`: Metrics and logging setup
//! - `builders`: Fluent configuration builder
//! - `client`: The resilient client composing everything above

pub mod builders;
pub mod client;
pub mod core;
pub mod error;
pub mod resilience;
pub mod telemetry;
pub mod token;
pub mod types;

// Re-export main client
pub use client::{create_client, ClientComponents, ResilientClient};

// Re-export builders
pub use builders::{session_auth_config, SessionAuthConfigBuilder};

// Re-export errors
pub use error::{
    create_error_from_response, AuthenticationError, ConfigurationError, NetworkError,
    ProtocolError, SessionAuthError, SessionAuthResult, UpstreamError, WebhookError,
};

// Re-export types
pub use types::{
    // Config
    InvalidationConfig, RefreshConfig, SecondaryCredentialPlacement, SessionAuthConfig,
    WebhookConfig, DEFAULT_INVALIDATION_MARKERS,
    // Token
    ClientIdentity, Credentials, TokenInfo,
    // Request
    ApiResponse, RequestOptions,
};

// Re-export core components
pub use core::{
    // Transport
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, MockHttpTransport,
    ReqwestHttpTransport,
    // Invalidation
    InvalidationDetector, StatusFieldDetector,
};

// Re-export token management
pub use token::{
    // Store
    InMemoryTokenStore, TokenStore,
    // Acquisition
    LoginTokenAcquirer, MockTokenAcquirer, TokenAcquirer,
    // Refresh
    ProactiveRefreshScheduler, SingleFlightRefresher,
    // Health
    EndpointHealthProbe, ExpiryHealthProbe, HealthProbe,
    // Webhook
    WebhookAuthBridge,
};

// Re-export resilience
pub use resilience::{
    // Retry
    create_retry_executor, BackoffRetryExecutor, RetryConfig, RetryExecutor, RetryStats,
    DEFAULT_RETRY_CONFIG,
    // Circuit Breaker
    create_circuit_breaker, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats,
    CircuitState, SessionCircuitBreaker, DEFAULT_CIRCUIT_BREAKER_CONFIG,
    // Rate Limiter
    create_mock_rate_limiter, create_rate_limiter, MockRateLimiter, RateLimiter,
    RateLimiterConfig, RateLimiterStats, SlidingWindowRateLimiter, DEFAULT_RATE_LIMITS,
    // Cache
    CacheConfig, CacheStats, ResponseCache,
};

// Re-export telemetry
pub use telemetry::{
    create_in_memory_metrics, no_op_metrics, InMemoryMetrics, LogFormat, LogLevel,
    LoggingConfig, MetricEntry, MetricLabels, NoOpMetrics, SessionMetrics,
};
