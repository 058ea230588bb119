//! Rate Limiter
//!
//! Sliding-window rate limiting for upstream calls.
//!
//! Callers over quota are delayed, never rejected: `acquire` loops, sleeping
//! until the oldest timestamp slides out of the window, and re-evaluates after
//! each sleep because concurrent acquirers may have taken the freed slot.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum number of requests admitted per window.
    pub max_requests: u32,
    /// Length of the trailing window.
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

/// Default rate limiter configuration.
pub const DEFAULT_RATE_LIMITS: RateLimiterConfig = RateLimiterConfig {
    max_requests: 60,
    window: Duration::from_secs(60),
};

/// Rate limiter statistics.
#[derive(Debug, Clone, Default)]
pub struct RateLimiterStats {
    pub total_requests: u32,
    pub allowed_requests: u32,
    pub delayed_requests: u32,
    pub total_wait: Duration,
}

/// Rate limiter interface.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until a request is permitted, then record it.
    async fn acquire(&self);

    /// Record a request if one is permitted right now.
    fn try_acquire(&self) -> bool;

    /// Requests still admissible in the current window.
    fn available_permits(&self) -> u32;

    /// Get rate limiter statistics.
    fn get_stats(&self) -> RateLimiterStats;
}

/// Sliding-window rate limiter.
///
/// Invariant: the window never holds more than `max_requests` timestamps.
pub struct SlidingWindowRateLimiter {
    config: RateLimiterConfig,
    window: Mutex<VecDeque<Instant>>,
    stats: Mutex<RateLimiterStats>,
}

impl SlidingWindowRateLimiter {
    /// Create new rate limiter.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(config.max_requests as usize)),
            stats: Mutex::new(RateLimiterStats::default()),
            config,
        }
    }

    fn purge(&self, window: &mut VecDeque<Instant>, now: Instant) {
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= self.config.window {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Admit now, or return how long to wait before re-evaluating.
    fn try_admit(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        self.purge(&mut window, now);

        if (window.len() as u32) < self.config.max_requests.max(1) {
            window.push_back(now);
            return Ok(());
        }

        let oldest = window.front().copied().unwrap_or(now);
        let wait = self
            .config
            .window
            .saturating_sub(now.duration_since(oldest));
        Err(wait.max(Duration::from_millis(1)))
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, RateLimiterStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SlidingWindowRateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowRateLimiter {
    async fn acquire(&self) {
        self.stats().total_requests += 1;
        let mut delayed = false;

        loop {
            match self.try_admit() {
                Ok(()) => {
                    let mut stats = self.stats();
                    stats.allowed_requests += 1;
                    if delayed {
                        stats.delayed_requests += 1;
                    }
                    return;
                }
                Err(wait) => {
                    delayed = true;
                    debug!(
                        wait_ms = wait.as_millis() as u64,
                        max_requests = self.config.max_requests,
                        "rate limit window full, waiting"
                    );
                    self.stats().total_wait += wait;
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    fn try_acquire(&self) -> bool {
        self.stats().total_requests += 1;
        let admitted = self.try_admit().is_ok();
        if admitted {
            self.stats().allowed_requests += 1;
        }
        admitted
    }

    fn available_permits(&self) -> u32 {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        self.purge(&mut window, Instant::now());
        self.config
            .max_requests
            .saturating_sub(window.len() as u32)
    }

    fn get_stats(&self) -> RateLimiterStats {
        self.stats().clone()
    }
}

/// Mock rate limiter for testing.
#[derive(Default)]
pub struct MockRateLimiter {
    acquire_count: AtomicU32,
}

impl MockRateLimiter {
    /// Create new mock rate limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get acquire count.
    pub fn get_acquire_count(&self) -> u32 {
        self.acquire_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RateLimiter for MockRateLimiter {
    async fn acquire(&self) {
        self.acquire_count.fetch_add(1, Ordering::SeqCst);
    }

    fn try_acquire(&self) -> bool {
        self.acquire_count.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn available_permits(&self) -> u32 {
        u32::MAX
    }

    fn get_stats(&self) -> RateLimiterStats {
        let count = self.get_acquire_count();
        RateLimiterStats {
            total_requests: count,
            allowed_requests: count,
            ..Default::default()
        }
    }
}

/// Create rate limiter.
pub fn create_rate_limiter(config: RateLimiterConfig) -> SlidingWindowRateLimiter {
    SlidingWindowRateLimiter::new(config)
}

/// Create mock rate limiter for testing.
pub fn create_mock_rate_limiter() -> MockRateLimiter {
    MockRateLimiter::new()
}
