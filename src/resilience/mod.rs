//! Resilience
//!
//! Resilience patterns wrapped around every outbound upstream call.
//!
//! This module provides:
//!
//! - **Retry**: Exponential backoff retry for transient faults
//! - **Circuit Breaker**: Fast-fail while the upstream is failing
//! - **Rate Limiter**: Sliding-window admission with back-pressure by delay
//! - **Response Cache**: Short-TTL memoization of idempotent reads

pub mod cache;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

// Retry
pub use retry::{
    create_retry_executor, BackoffRetryExecutor, RetryConfig, RetryExecutor, RetryStats,
    DEFAULT_RETRY_CONFIG,
};

// Circuit Breaker
pub use circuit_breaker::{
    create_circuit_breaker, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats,
    CircuitState, SessionCircuitBreaker, DEFAULT_CIRCUIT_BREAKER_CONFIG,
};

// Rate Limiter
pub use rate_limiter::{
    create_mock_rate_limiter, create_rate_limiter, MockRateLimiter, RateLimiter,
    RateLimiterConfig, RateLimiterStats, SlidingWindowRateLimiter, DEFAULT_RATE_LIMITS,
};

// Response Cache
pub use cache::{cache_key, CacheConfig, CacheStats, ResponseCache, MAX_ENTRY_TTL};
