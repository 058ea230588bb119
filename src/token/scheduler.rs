//! Proactive Refresh Scheduler
//!
//! Keeps one identity's token warm independently of request traffic.
//!
//! Two timers run while the scheduler is started:
//!
//! - a one-shot refresh timer, recomputed after every attempt as
//!   `max(time_until_refresh - jitter, minimum_delay)`, or the fixed failure
//!   retry delay after a failed attempt;
//! - a fixed-interval health check that probes the current token and forces
//!   an out-of-band refresh when the token is unhealthy or the refresh timer
//!   has gone missing.
//!
//! [`ProactiveRefreshScheduler::stop`] cancels the timers only. An acquisition
//! the refresher already started keeps running to completion and stores its
//! token; nothing new is started afterwards.

use async_trait::async_trait;
use rand::Rng;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::{HttpMethod, HttpRequest, HttpTransport, InvalidationDetector};
use crate::error::{create_error_from_response, SessionAuthError};
use crate::token::SingleFlightRefresher;
use crate::types::{Credentials, RefreshConfig, SecondaryCredentialPlacement, TokenInfo};

/// Source of the random early offset applied to refresh timers.
pub trait JitterSource: Send + Sync {
    /// Sample an offset uniformly from `[0, window]`.
    fn sample(&self, window: Duration) -> Duration;
}

/// Uniform random jitter at microsecond resolution.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self, window: Duration) -> Duration {
        let max = u64::try_from(window.as_micros()).unwrap_or(u64::MAX);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rand::thread_rng().gen_range(0..=max))
    }
}

/// No jitter.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullJitter;

impl JitterSource for NullJitter {
    fn sample(&self, _window: Duration) -> Duration {
        Duration::ZERO
    }
}

/// Delay before the next proactive refresh.
pub fn compute_refresh_delay(
    time_until_refresh: Duration,
    jitter: Duration,
    minimum_delay: Duration,
) -> Duration {
    time_until_refresh.saturating_sub(jitter).max(minimum_delay)
}

/// Health check for the current token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `Ok(true)` when the token is still usable.
    async fn check(&self, token: &TokenInfo) -> Result<bool, SessionAuthError>;
}

/// Health check by expiry inspection only.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpiryHealthProbe;

#[async_trait]
impl HealthProbe for ExpiryHealthProbe {
    async fn check(&self, token: &TokenInfo) -> Result<bool, SessionAuthError> {
        Ok(!token.is_expired() && !token.needs_refresh())
    }
}

/// Health check by a lightweight authenticated call.
pub struct EndpointHealthProbe {
    transport: Arc<dyn HttpTransport>,
    url: String,
    timeout: Duration,
    placement: SecondaryCredentialPlacement,
    detector: Arc<dyn InvalidationDetector>,
}

impl EndpointHealthProbe {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        url: impl Into<String>,
        timeout: Duration,
        placement: SecondaryCredentialPlacement,
        detector: Arc<dyn InvalidationDetector>,
    ) -> Self {
        Self {
            transport,
            url: url.into(),
            timeout,
            placement,
            detector,
        }
    }
}

#[async_trait]
impl HealthProbe for EndpointHealthProbe {
    async fn check(&self, token: &TokenInfo) -> Result<bool, SessionAuthError> {
        let request = self.placement.apply(
            HttpRequest::new(HttpMethod::Get, self.url.clone()).with_timeout(self.timeout),
            token,
        );
        let response = self.transport.send(request).await?;

        match response.status {
            401 | 403 => Ok(false),
            200..=299 => Ok(!self.detector.is_invalidated(&response.body)),
            status => Err(create_error_from_response(status, &response.body)),
        }
    }
}

#[derive(Default)]
struct SchedulerState {
    running: bool,
    refresh_task: Option<JoinHandle<()>>,
    health_task: Option<JoinHandle<()>>,
    next_refresh_at: Option<Instant>,
}

struct SchedulerInner {
    refresher: Arc<SingleFlightRefresher>,
    credentials: Credentials,
    config: RefreshConfig,
    jitter: Arc<dyn JitterSource>,
    probe: Arc<dyn HealthProbe>,
    state: Mutex<SchedulerState>,
}

impl SchedulerInner {
    fn state(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn delay_after_success(&self, token: &TokenInfo) -> Duration {
        compute_refresh_delay(
            token.time_until_refresh(),
            self.jitter.sample(self.config.jitter_window),
            self.config.minimum_delay,
        )
    }

    fn initial_delay(&self) -> Duration {
        match self.refresher.current_token(&self.credentials.identity()) {
            Some(token) => self.delay_after_success(&token),
            None => Duration::ZERO,
        }
    }
}

/// Timer-driven refresh for one identity.
pub struct ProactiveRefreshScheduler {
    inner: Arc<SchedulerInner>,
}

impl ProactiveRefreshScheduler {
    /// Create a stopped scheduler with random jitter and expiry health checks.
    pub fn new(
        refresher: Arc<SingleFlightRefresher>,
        credentials: Credentials,
        config: RefreshConfig,
    ) -> Self {
        Self::with_components(
            refresher,
            credentials,
            config,
            Arc::new(RandomJitter),
            Arc::new(ExpiryHealthProbe),
        )
    }

    /// Create a stopped scheduler with explicit jitter and probe.
    pub fn with_components(
        refresher: Arc<SingleFlightRefresher>,
        credentials: Credentials,
        config: RefreshConfig,
        jitter: Arc<dyn JitterSource>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                refresher,
                credentials,
                config,
                jitter,
                probe,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Start both timers. No-op when already running.
    pub fn start(&self) {
        let mut state = self.inner.state();
        if state.running {
            return;
        }

        let initial = self.inner.initial_delay();
        state.running = true;
        state.next_refresh_at = Some(Instant::now() + initial);
        state.refresh_task = Some(tokio::spawn(refresh_loop(Arc::clone(&self.inner), initial)));
        state.health_task = Some(tokio::spawn(health_loop(Arc::clone(&self.inner))));

        info!(
            identity = %self.inner.credentials.identity(),
            first_refresh_ms = initial.as_millis() as u64,
            "refresh scheduler started"
        );
    }

    /// Cancel both timers. No new refresh starts after this returns.
    ///
    /// An acquisition already spawned by the refresher is not cancelled: it
    /// finishes, stores its token and wakes any request waiting on it.
    pub fn stop(&self) {
        let mut state = self.inner.state();
        if !state.running {
            return;
        }

        state.running = false;
        state.next_refresh_at = None;
        if let Some(task) = state.refresh_task.take() {
            task.abort();
        }
        if let Some(task) = state.health_task.take() {
            task.abort();
        }

        info!(identity = %self.inner.credentials.identity(), "refresh scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.state().running
    }

    /// When the refresh timer fires next, if it is armed.
    pub fn next_refresh_at(&self) -> Option<Instant> {
        self.inner.state().next_refresh_at
    }

    /// Run one health check immediately.
    pub async fn run_health_check(&self) {
        health_check(&self.inner).await;
    }
}

impl Drop for ProactiveRefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn refresh_loop(inner: Arc<SchedulerInner>, initial: Duration) {
    let mut delay = initial;

    loop {
        tokio::time::sleep(delay).await;
        inner.state().next_refresh_at = None;

        delay = match inner.refresher.force_refresh(&inner.credentials).await {
            Ok(token) => inner.delay_after_success(&token),
            Err(error) => {
                warn!(
                    identity = %inner.credentials.identity(),
                    error = %error,
                    retry_ms = inner.config.failure_retry_delay.as_millis() as u64,
                    "proactive refresh failed"
                );
                inner.config.failure_retry_delay
            }
        };

        let mut state = inner.state();
        if !state.running {
            return;
        }
        state.next_refresh_at = Some(Instant::now() + delay);
        debug!(
            identity = %inner.credentials.identity(),
            delay_ms = delay.as_millis() as u64,
            "next proactive refresh scheduled"
        );
    }
}

async fn health_loop(inner: Arc<SchedulerInner>) {
    let period = inner.config.health_check_interval;
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        interval.tick().await;
        health_check(&inner).await;
    }
}

async fn health_check(inner: &Arc<SchedulerInner>) {
    let identity = inner.credentials.identity();

    let healthy = match inner.refresher.current_token(&identity) {
        Some(token) => match inner.probe.check(&token).await {
            Ok(healthy) => healthy,
            Err(error) => {
                warn!(identity = %identity, error = %error, "health probe failed");
                false
            }
        },
        None => false,
    };

    let timer_missing = {
        let state = inner.state();
        if !state.running {
            return;
        }
        let task_gone = state
            .refresh_task
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true);
        let overdue = state
            .next_refresh_at
            .map(|at| Instant::now() > at + inner.config.minimum_delay)
            .unwrap_or(false);
        task_gone || overdue
    };

    if healthy && !timer_missing {
        debug!(identity = %identity, "token healthy");
        return;
    }

    warn!(
        identity = %identity,
        healthy,
        timer_missing,
        "forcing out-of-band refresh"
    );

    let delay = match inner.refresher.force_refresh(&inner.credentials).await {
        Ok(token) => inner.delay_after_success(&token),
        Err(error) => {
            warn!(identity = %identity, error = %error, "out-of-band refresh failed");
            inner.config.failure_retry_delay
        }
    };

    let mut state = inner.state();
    if !state.running {
        return;
    }
    if let Some(task) = state.refresh_task.take() {
        task.abort();
    }
    state.next_refresh_at = Some(Instant::now() + delay);
    state.refresh_task = Some(tokio::spawn(refresh_loop(Arc::clone(inner), delay)));
}
