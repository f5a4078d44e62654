//! Token-bucket rate limiting, per-instance and composed.
//!
//! The in-process bucket here backs single-process deployments; the
//! shared/persisted variant lives in `engram_db::bucket` and performs the
//! same acquire-and-deduct arithmetic as one atomic SQL statement so
//! multiple workers against one instance converge without a coordinator.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("acquire of {requested} token(s) timed out after {waited_ms}ms")]
    Timeout { requested: f64, waited_ms: u64 },
}

#[derive(Debug, Clone, Copy)]
pub struct BucketConfig {
    pub rate: f64,
    pub burst: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LimiterStats {
    pub total_429_hits: u64,
    pub timeout_count: u64,
    pub avg_wait_ms: f64,
    pub current_tokens: f64,
    pub paused_until: Option<DateTime<Utc>>,
}

struct BucketState {
    tokens: f64,
    updated_at: DateTime<Utc>,
    paused_until: Option<DateTime<Utc>>,
    total_429_hits: u64,
    timeout_count: u64,
    wait_ms_sum: f64,
    wait_samples: u64,
}

/// In-process token bucket shared across tasks in one instance via a mutex.
pub struct RateLimiter {
    cfg: BucketConfig,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(cfg: BucketConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(BucketState {
                    tokens: cfg.burst,
                    updated_at: Utc::now(),
                    paused_until: None,
                    total_429_hits: 0,
                    timeout_count: 0,
                    wait_ms_sum: 0.0,
                    wait_samples: 0,
            }),
        }
    }

    fn refill_locked(&self, state: &mut BucketState, now: DateTime<Utc>) {
        let elapsed = (now - state.updated_at).num_milliseconds().max(0) as f64 / 1000.0;
        state.tokens = (state.tokens + elapsed * self.cfg.rate).min(self.cfg.burst);
        state.updated_at = now;
    }

    /// Blocks (yielding between polls) until `n` tokens are available or
    /// `timeout` elapses. A `paused_until` set by `notify_rate_limit`
    /// suppresses acquisition until that instant regardless of token count.
    pub async fn acquire(&self, n: f64, timeout: Duration) -> Result<(), LimiterError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let started = tokio::time::Instant::now();

        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                let now = Utc::now();
                self.refill_locked(&mut state, now);

                if let Some(paused_until) = state.paused_until {
                    if now < paused_until {
                        drop(state);
                        None
                    } else {
                        state.paused_until = None;
                        if state.tokens >= n {
                            state.tokens -= n;
                            Some(Duration::ZERO)
                        } else {
                            None
                        }
                    }
                } else if state.tokens >= n {
                    state.tokens -= n;
                    Some(Duration::ZERO)
                } else {
                    None
                }
            };

            if wait.is_some() {
                let waited = started.elapsed();
                let mut state = self.state.lock().unwrap();
                state.wait_ms_sum += waited.as_millis() as f64;
                state.wait_samples += 1;
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                let mut state = self.state.lock().unwrap();
                state.timeout_count += 1;
                return Err(LimiterError::Timeout {
                        requested: n,
                        waited_ms: started.elapsed().as_millis() as u64,
                });
            }

            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Records an upstream rate-limit signal and pauses all `acquire` calls
    /// until the later of `retry_after` and `reset_time`.
    pub fn notify_rate_limit(&self, retry_after: Option<Duration>, reset_time: Option<DateTime<Utc>>) {
        let now = Utc::now();
        let from_retry_after = retry_after.map(|d| now + chrono::Duration::from_std(d).unwrap_or_default());
        let candidate = match (from_retry_after, reset_time) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };

        let mut state = self.state.lock().unwrap();
        state.total_429_hits += 1;
        if let Some(candidate) = candidate {
            state.paused_until = Some(match state.paused_until {
                    Some(existing) => existing.max(candidate),
                    None => candidate,
            });
        }
    }

    pub fn stats(&self) -> LimiterStats {
        let state = self.state.lock().unwrap();
        let avg_wait_ms = if state.wait_samples > 0 {
            state.wait_ms_sum / state.wait_samples as f64
        } else {
            0.0
        };
        LimiterStats {
            total_429_hits: state.total_429_hits,
            timeout_count: state.timeout_count,
            avg_wait_ms,
            current_tokens: state.tokens,
            paused_until: state.paused_until,
        }
    }

    pub fn pause_remaining_seconds(&self) -> f64 {
        let state = self.state.lock().unwrap();
        match state.paused_until {
            Some(until) => (until - Utc::now()).num_milliseconds().max(0) as f64 / 1000.0,
            None => 0.0,
        }
    }
}

/// Logical AND of child limiters: a composed acquire only succeeds once
/// every child has acquired. Children already acquired are not refunded if
/// a later child times out, matching the "all or none, but no rollback"
/// contract of the underlying token buckets.
pub struct ComposedLimiter {
    children: Vec<RateLimiter>,
}

impl ComposedLimiter {
    pub fn new(children: Vec<RateLimiter>) -> Self {
        Self { children }
    }

    pub async fn acquire(&self, n: f64, timeout: Duration) -> Result<(), LimiterError> {
        for child in &self.children {
            child.acquire(n, timeout).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_succeeds_within_burst() {
        let limiter = RateLimiter::new(BucketConfig { rate: 1.0, burst: 5.0 });
        for _ in 0..5 {
            limiter.acquire(1.0, Duration::from_millis(50)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn acquire_times_out_when_bucket_is_empty() {
        let limiter = RateLimiter::new(BucketConfig { rate: 0.01, burst: 1.0 });
        limiter.acquire(1.0, Duration::from_millis(50)).await.unwrap();
        let err = limiter.acquire(1.0, Duration::from_millis(60)).await.unwrap_err();
        assert!(matches!(err, LimiterError::Timeout {.. }));
        assert_eq!(limiter.stats().timeout_count, 1);
    }

    #[tokio::test]
    async fn notify_rate_limit_suppresses_until_the_later_hint() {
        let limiter = RateLimiter::new(BucketConfig { rate: 10.0, burst: 10.0 });
        limiter.notify_rate_limit(Some(Duration::from_millis(80)), None);
        let err = limiter.acquire(1.0, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, LimiterError::Timeout {.. }));
        assert_eq!(limiter.stats().total_429_hits, 1);
    }
}
