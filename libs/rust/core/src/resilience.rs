//! Retry with jittered exponential backoff and a circuit breaker, used by
//! the remote serving adapter for transport failures.

use std::sync::Arc;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use rand::{thread_rng, Rng};
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::REMOTE_METRICS;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64, // 0.0 - 1.0
}
impl Default for RetryConfig { fn default() -> Self { Self { max_retries: 3, base_delay: Duration::from_millis(50), max_delay: Duration::from_millis(1500), jitter: 0.25 } } }

pub async fn retry_async<F, Fut, T, E>(cfg: &RetryConfig, mut op: F) -> Result<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= cfg.max_retries => return Err(e),
            Err(e) => {
                let delay = backoff(cfg, attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                REMOTE_METRICS.retries_total.inc();
                tokio::time::sleep(delay).await;
            }
        }
        attempt += 1;
    }
}

fn backoff(cfg: &RetryConfig, attempt: usize) -> Duration {
    // saturates instead of overflowing for large attempt counts
    let factor = 2u32.saturating_pow(attempt.min(u32::MAX as usize) as u32);
    let delay = std::cmp::min(cfg.base_delay.saturating_mul(factor), cfg.max_delay);
    if cfg.jitter <= 0.0 { return delay; }
    let jitter_ms = (delay.as_millis() as f64 * cfg.jitter) as i64;
    let offset: i64 = thread_rng().gen_range(-jitter_ms..=jitter_ms);
    Duration::from_millis((delay.as_millis() as i64 + offset).max(0) as u64)
}

#[derive(Debug, Clone, PartialEq)]
pub enum BreakerState { Closed, Open { opened_at: Instant }, HalfOpen }

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit open")]
    Open,
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    failures: Mutex<usize>,
    failure_threshold: usize,
    open_timeout: Duration,
    half_open_successes: Mutex<usize>,
    required_half_open_successes: usize,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: usize, open_timeout: Duration, required_half_open_successes: usize) -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(BreakerState::Closed), failures: Mutex::new(0), failure_threshold, open_timeout, half_open_successes: Mutex::new(0), required_half_open_successes })
    }

    pub fn state(&self) -> BreakerState { self.state.lock().clone() }

    pub async fn exec<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where F: FnOnce() -> Fut, Fut: std::future::Future<Output = Result<T, E>> {
        {
            let mut st = self.state.lock();
            // transition from Open -> HalfOpen if timeout expired
            if let BreakerState::Open { opened_at } = *st {
                if opened_at.elapsed() >= self.open_timeout { *st = BreakerState::HalfOpen; }
            }
            if let BreakerState::Open { .. } = *st { return Err(BreakerError::Open); }
        }
        match op().await {
            Ok(v) => { self.on_success(); Ok(v) }
            Err(e) => { self.on_failure(); Err(BreakerError::Inner(e)) }
        }
    }

    fn on_success(&self) {
        let mut st = self.state.lock();
        match *st {
            BreakerState::Closed => { *self.failures.lock() = 0; }
            BreakerState::HalfOpen => {
                let mut succ = self.half_open_successes.lock();
                *succ += 1;
                if *succ >= self.required_half_open_successes {
                    *st = BreakerState::Closed;
                    *self.failures.lock() = 0;
                    *succ = 0;
                }
            }
            BreakerState::Open { .. } => {}
        }
    }

    fn on_failure(&self) {
        let mut st = self.state.lock();
        match *st {
            BreakerState::Closed => {
                let mut f = self.failures.lock();
                *f += 1;
                if *f >= self.failure_threshold { self.open(&mut st); }
            }
            BreakerState::HalfOpen => {
                self.open(&mut st);
                *self.half_open_successes.lock() = 0;
            }
            BreakerState::Open { .. } => {}
        }
    }

    fn open(&self, st: &mut BreakerState) {
        *st = BreakerState::Open { opened_at: Instant::now() };
        REMOTE_METRICS.breaker_open_total.inc();
        warn!(open_timeout_ms = self.open_timeout.as_millis() as u64, "circuit opened");
    }
}
