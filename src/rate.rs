//! Request pacing and throughput telemetry.
//!
//! [`RateLimiter`] spaces request grants at least `interval / rate` apart. It is a GCRA limiter
//! with a burst of one, so the whole read-modify-write of the "next allowed instant" happens on
//! a single atomic cell and concurrently suspended callers can never be granted closer together
//! than one period. Grant order among waiters is not FIFO.
//!
//! [`RateMonitor`] keeps a trailing window of completed requests and their sizes. It is advisory
//! only and never affects scheduling.

use governor::{
    Quota, clock::DefaultClock, middleware::NoOpMiddleware, state::InMemoryState,
    state::NotKeyed,
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::error::{EftsError, Result};

type Governor = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Paces callers to a fixed number of grants per interval.
#[derive(Debug)]
pub struct RateLimiter {
    governor: Governor,
    period: Duration,
}

impl RateLimiter {
    /// Creates a limiter granting `requests_per_second` acquisitions per second.
    pub fn new(requests_per_second: f64) -> Result<Self> {
        Self::with_interval(requests_per_second, Duration::from_secs(1))
    }

    /// Creates a limiter granting `rate` acquisitions per `interval`.
    pub fn with_interval(rate: f64, interval: Duration) -> Result<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(EftsError::ConfigError(format!(
                "Rate must be a positive number, got {}",
                rate
            )));
        }

        let period = Duration::from_secs_f64(interval.as_secs_f64() / rate);
        let quota = Quota::with_period(period).ok_or_else(|| {
            EftsError::ConfigError(format!("Rate {} per {:?} is too high", rate, interval))
        })?;

        Ok(Self {
            governor: governor::RateLimiter::direct(quota),
            period,
        })
    }

    /// Suspends until the next grant is available.
    pub async fn acquire(&self) {
        self.governor.until_ready().await;
    }

    /// Minimum spacing between two grants.
    pub fn period(&self) -> Duration {
        self.period
    }
}

/// Snapshot of recent throughput.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Throughput {
    pub requests_per_second: f64,
    pub megabytes_per_second: f64,
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1}/s | {:.2} MB/s",
            self.requests_per_second, self.megabytes_per_second
        )
    }
}

/// Sliding-window counter of completed requests.
#[derive(Debug)]
pub struct RateMonitor {
    window: Duration,
    requests: Mutex<VecDeque<(Instant, usize)>>,
}

impl Default for RateMonitor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl RateMonitor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            requests: Mutex::new(VecDeque::new()),
        }
    }

    /// Records a completed request of `size_bytes`.
    pub fn record(&self, size_bytes: usize) {
        self.record_at(Instant::now(), size_bytes);
    }

    /// Current request and byte rates over the trailing window.
    pub fn current_rates(&self) -> Throughput {
        self.rates_at(Instant::now())
    }

    fn record_at(&self, now: Instant, size_bytes: usize) {
        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        requests.push_back((now, size_bytes));
        Self::evict(&mut requests, now, self.window);
    }

    fn rates_at(&self, now: Instant) -> Throughput {
        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        Self::evict(&mut requests, now, self.window);
        if requests.is_empty() {
            return Throughput::default();
        }

        let window = self.window.as_secs_f64();
        let bytes: usize = requests.iter().map(|(_, size)| size).sum();
        Throughput {
            requests_per_second: requests.len() as f64 / window,
            megabytes_per_second: bytes as f64 / 1024.0 / 1024.0 / window,
        }
    }

    fn evict(requests: &mut VecDeque<(Instant, usize)>, now: Instant, window: Duration) {
        while let Some(&(at, _)) = requests.front() {
            if now.saturating_duration_since(at) > window {
                requests.pop_front();
            } else {
                break;
            }
        }
    }
}
