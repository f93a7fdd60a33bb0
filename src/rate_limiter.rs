//! Sliding-window request limiter
//!
//! Every outbound provider call passes through [`RateLimiter::admit`]. The
//! limiter keeps the instants of the admissions inside the trailing window and
//! suspends the caller until the oldest one expires whenever the window is full.

use crate::config::{IngestConfig, RetryConfig};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};

/// Exponential retry delay owned by the limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based), doubling and capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(retry: &RetryConfig) -> Self {
        Self {
            initial: Duration::from_millis(retry.initial_backoff_ms),
            max: Duration::from_millis(retry.max_backoff_ms),
        }
    }
}

/// Admission instants inside the trailing window
///
/// Only the limiter mutates this, under its mutex.
#[derive(Debug, Default)]
struct RequestBudget {
    admissions: VecDeque<Instant>,
    total_admitted: u64,
    /// Admissions that had to wait for the window
    total_delayed: u64,
}

impl RequestBudget {
    fn evict_expired(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.admissions.front() {
            if now.duration_since(*oldest) >= window {
                self.admissions.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window rate limiter shared by every fetch of the process
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    backoff: BackoffPolicy,
    budget: Mutex<RequestBudget>,
}

impl RateLimiter {
    /// Creates a limiter admitting at most `max_requests` per `window`
    pub fn new(max_requests: u32, window: Duration, backoff: BackoffPolicy) -> Self {
        Self {
            max_requests: max_requests.max(1) as usize,
            window,
            backoff,
            budget: Mutex::new(RequestBudget::default()),
        }
    }

    /// Creates a limiter from the `rate` and `retry` sections
    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(
            config.rate.max_requests_per_window,
            config.rate.window_duration(),
            BackoffPolicy::from(&config.retry),
        )
    }

    /// Waits until a request may be sent, records it and returns its instant
    ///
    /// The budget lock is held while waiting, so concurrent callers are
    /// admitted one at a time in lock order.
    pub async fn admit(&self) -> Instant {
        let mut budget = self.budget.lock().await;
        let mut delayed = false;
        loop {
            let now = Instant::now();
            budget.evict_expired(now, self.window);

            if budget.admissions.len() < self.max_requests {
                budget.admissions.push_back(now);
                budget.total_admitted += 1;
                if delayed {
                    budget.total_delayed += 1;
                }
                return now;
            }

            let Some(&oldest) = budget.admissions.front() else {
                continue;
            };
            let resume_at = oldest + self.window;
            tracing::debug!(
                wait_ms = resume_at.saturating_duration_since(now).as_millis() as u64,
                max_requests = self.max_requests,
                window_secs = self.window.as_secs(),
                "Request window full, delaying admission"
            );
            delayed = true;
            sleep_until(resume_at).await;
        }
    }

    /// Sleeps for the retry delay of `attempt` (1-based) and returns it
    pub async fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.backoff.delay_for(attempt);
        tracing::debug!(
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            "Backing off before retry"
        );
        sleep(delay).await;
        delay
    }

    /// Number of admissions inside the current window
    pub async fn in_window(&self) -> usize {
        let mut budget = self.budget.lock().await;
        budget.evict_expired(Instant::now(), self.window);
        budget.admissions.len()
    }

    /// Admissions still available in the current window without waiting
    pub async fn available(&self) -> usize {
        self.max_requests.saturating_sub(self.in_window().await)
    }

    /// Admissions recorded since this limiter was created
    pub async fn total_admitted(&self) -> u64 {
        self.budget.lock().await.total_admitted
    }

    /// Admissions since creation that had to wait for the window
    pub async fn total_delayed(&self) -> u64 {
        self.budget.lock().await.total_delayed
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
