//! Circuit Breaker
//!
//! Circuit breaker pattern for protecting the upstream API.
//!
//! All transitions happen under one lock, so concurrent failures cannot
//! double-trip the breaker or lose a transition. `Open -> HalfOpen` is lazy:
//! it is evaluated on the next `execute` once the recovery timeout has elapsed,
//! and exactly one trial call is admitted while half-open.

use async_trait::async_trait;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{NetworkError, SessionAuthError};

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, a single trial request is allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a trial call is allowed.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Default circuit breaker configuration.
pub const DEFAULT_CIRCUIT_BREAKER_CONFIG: CircuitBreakerConfig = CircuitBreakerConfig {
    failure_threshold: 5,
    recovery_timeout: Duration::from_secs(60),
};

/// Circuit breaker statistics.
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerStats {
    pub total_requests: u32,
    pub successful_requests: u32,
    pub failed_requests: u32,
    pub rejected_requests: u32,
    pub state_transitions: u32,
}

/// Circuit breaker interface.
#[async_trait]
pub trait CircuitBreaker: Send + Sync {
    /// Execute an operation through the circuit breaker.
    async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, SessionAuthError>
    where
        T: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, SessionAuthError>> + Send;

    /// Get current circuit state.
    fn state(&self) -> CircuitState;

    /// Reset the circuit breaker.
    fn reset(&self);

    /// Get circuit breaker statistics.
    fn get_stats(&self) -> CircuitBreakerStats;
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
    stats: CircuitBreakerStats,
}

impl BreakerState {
    fn transition(&mut self, to: CircuitState) {
        if self.state != to {
            info!(from = %self.state, to = %to, "circuit breaker state change");
            self.state = to;
            self.stats.state_transitions += 1;
        }
    }
}

/// Admission decision for one call.
enum Admission {
    Normal,
    Trial,
}

/// Circuit breaker guarding upstream calls.
pub struct SessionCircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl SessionCircuitBreaker {
    /// Create new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                trial_in_flight: false,
                stats: CircuitBreakerStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recovery_elapsed(&self, state: &BreakerState) -> bool {
        state
            .last_failure_time
            .map(|t| t.elapsed() > self.config.recovery_timeout)
            .unwrap_or(true)
    }

    fn admit(&self) -> Result<Admission, SessionAuthError> {
        let mut state = self.lock();
        state.stats.total_requests += 1;

        if state.state == CircuitState::Open && self.recovery_elapsed(&state) {
            state.transition(CircuitState::HalfOpen);
            state.trial_in_flight = false;
        }

        match state.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::HalfOpen if !state.trial_in_flight => {
                state.trial_in_flight = true;
                debug!("circuit half-open, admitting trial call");
                Ok(Admission::Trial)
            }
            _ => {
                state.stats.rejected_requests += 1;
                Err(SessionAuthError::Network(NetworkError::CircuitOpen))
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.lock();
        state.stats.successful_requests += 1;
        state.failure_count = 0;
        state.trial_in_flight = false;
        state.transition(CircuitState::Closed);
    }

    fn record_failure(&self) {
        let mut state = self.lock();
        state.stats.failed_requests += 1;
        state.trial_in_flight = false;

        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    warn!(
                        failures = state.failure_count,
                        "failure threshold reached, opening circuit"
                    );
                    state.last_failure_time = Some(Instant::now());
                    state.transition(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                warn!("trial call failed, reopening circuit");
                state.last_failure_time = Some(Instant::now());
                state.transition(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }
}

impl Default for SessionCircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

/// Releases a half-open trial slot if the trial call is dropped before completing.
struct TrialGuard<'a> {
    breaker: &'a SessionCircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

#[async_trait]
impl CircuitBreaker for SessionCircuitBreaker {
    async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, SessionAuthError>
    where
        T: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, SessionAuthError>> + Send,
    {
        let admission = self.admit()?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: matches!(admission, Admission::Trial),
        };

        let result = operation().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        result
    }

    fn state(&self) -> CircuitState {
        let mut state = self.lock();
        if state.state == CircuitState::Open && self.recovery_elapsed(&state) {
            state.transition(CircuitState::HalfOpen);
            state.trial_in_flight = false;
        }
        state.state
    }

    fn reset(&self) {
        let mut state = self.lock();
        state.transition(CircuitState::Closed);
        state.failure_count = 0;
        state.last_failure_time = None;
        state.trial_in_flight = false;
    }

    fn get_stats(&self) -> CircuitBreakerStats {
        self.lock().stats.clone()
    }
}

/// Create circuit breaker.
pub fn create_circuit_breaker(config: CircuitBreakerConfig) -> SessionCircuitBreaker {
    SessionCircuitBreaker::new(config)
}
