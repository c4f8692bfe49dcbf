//! Retry/Backoff Controller.
//!
//! Wraps every backend call made by the pipeline. The policy is stateless
//! given `(error kind, attempts so far)`:
//!
//! | Kind | Max attempts | Delay before attempt n+1 |
//! |------|--------------|--------------------------|
//! | `TransientNetwork`, `EngineUnavailable` | `max_attempts` (5) | `base · 2^(n-1)`, capped at `max_delay` |
//! | `RateLimited` | `rate_limited_max_attempts` (5) | `rate_limited_min_delay · 2^(n-1)`, capped at `rate_limited_max_delay` |
//! | `Processing`, `UnsupportedFormat`, … | 1 | never retried |
//!
//! Random jitter of up to `jitter × delay` is *added* on top, so the
//! computed delay is also the minimum actually slept. Provider quotas reset
//! on a slower cadence than a flaky network recovers, hence the separate,
//! higher floor and ceiling for `RateLimited`.

use crate::error::{ErrorKind, OcrflowError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Bounded exponential backoff, per error class.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts for `TransientNetwork` / `EngineUnavailable`. Default: 5.
    pub max_attempts: u32,
    /// Total attempts for `RateLimited`. Default: 5.
    pub rate_limited_max_attempts: u32,
    /// First retry delay for transient errors. Default: 500 ms.
    pub base_delay: Duration,
    /// Ceiling for transient delays. Default: 30 s.
    pub max_delay: Duration,
    /// First retry delay for `RateLimited`. Default: 5 s.
    pub rate_limited_min_delay: Duration,
    /// Ceiling for `RateLimited` delays. Default: 120 s.
    pub rate_limited_max_delay: Duration,
    /// Fraction of the delay added as random jitter (0.0–1.0). Default: 0.25.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            rate_limited_max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            rate_limited_min_delay: Duration::from_secs(5),
            rate_limited_max_delay: Duration::from_secs(120),
            jitter: 0.25,
        }
    }
}

/// What the classifier reports about a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    /// Server-requested minimum wait, honoured up to the class ceiling.
    pub retry_after: Option<Duration>,
}

impl From<ErrorKind> for Classification {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            retry_after: None,
        }
    }
}

/// Final result of a retried call plus how many calls it took.
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Maximum total calls allowed once an error of `kind` has been seen.
    pub fn max_attempts_for(&self, kind: ErrorKind) -> u32 {
        match kind {
            ErrorKind::TransientNetwork | ErrorKind::EngineUnavailable => self.max_attempts,
            ErrorKind::RateLimited => self.rate_limited_max_attempts,
            _ => 1,
        }
    }

    /// Deterministic delay (before jitter) after `failures` failed calls.
    ///
    /// `failures` starts at 1: the wait between the first and second call.
    pub fn backoff(&self, kind: ErrorKind, failures: u32) -> Duration {
        let (floor, ceiling) = match kind {
            ErrorKind::RateLimited => (self.rate_limited_min_delay, self.rate_limited_max_delay),
            _ => (self.base_delay, self.max_delay),
        };
        let exp = failures.saturating_sub(1).min(31);
        floor
            .checked_mul(1u32 << exp)
            .unwrap_or(ceiling)
            .min(ceiling)
    }

    /// Backoff plus jitter, raised to any server `Retry-After` hint.
    pub fn delay_for(&self, class: Classification, failures: u32) -> Duration {
        let base = self.backoff(class.kind, failures);
        let ceiling = match class.kind {
            ErrorKind::RateLimited => self.rate_limited_max_delay,
            _ => self.max_delay,
        };
        let base = match class.retry_after {
            Some(hint) => base.max(hint.min(ceiling)),
            None => base,
        };
        self.with_jitter(base)
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        let span_ms = (delay.as_millis() as f64 * self.jitter.clamp(0.0, 1.0)) as u64;
        if span_ms == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::rng().random_range(0..=span_ms))
    }

    /// Validate the policy's internal ordering constraints.
    pub fn validate(&self) -> Result<(), OcrflowError> {
        if self.max_attempts == 0 || self.rate_limited_max_attempts == 0 {
            return Err(OcrflowError::InvalidConfig(
                "retry attempts must be ≥ 1".into(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(OcrflowError::InvalidConfig(format!(
                "retry base delay {:?} exceeds ceiling {:?}",
                self.base_delay, self.max_delay
            )));
        }
        if self.rate_limited_min_delay <= self.base_delay
            || self.rate_limited_max_delay <= self.max_delay
        {
            return Err(OcrflowError::InvalidConfig(
                "rate-limit floor and ceiling must exceed the transient ones".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(OcrflowError::InvalidConfig(format!(
                "jitter must be within 0.0–1.0, got {}",
                self.jitter
            )));
        }
        Ok(())
    }

    /// Run `call` until it succeeds, hits a permanent error, or exhausts the
    /// attempt budget of the class it is currently failing with.
    ///
    /// `call` receives the 1-based attempt number. The adapter behind it must
    /// not retry on its own.
    pub async fn execute<T, E, F, Fut, C>(&self, mut call: F, classify: C) -> Attempted<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> Classification,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            let err = match call(attempt).await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(e) => e,
            };

            let class = classify(&err);
            let budget = self.max_attempts_for(class.kind);
            if !class.kind.is_retryable() || attempt >= budget {
                debug!(
                    attempt,
                    budget,
                    kind = %class.kind,
                    "Giving up: {}", err
                );
                return Attempted {
                    result: Err(err),
                    attempts: attempt,
                };
            }

            let delay = self.delay_for(class, attempt);
            warn!(
                attempt,
                budget,
                kind = %class.kind,
                delay_ms = delay.as_millis() as u64,
                "Retrying after error: {}", err
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}
