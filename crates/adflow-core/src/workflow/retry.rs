//! Retry policy and the retrying call wrapper used for every platform call.
//!
//! [`RetryPolicy`] is pure: given the error of the attempt that just failed
//! and its 1-based attempt number, it decides whether to try again and how
//! long to wait. [`Retrier`] combines the policy with the shared
//! [`RateLimiter`], a per-attempt timeout and the credential refresh hook.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use adflow_types::config::RetryConfig;
use adflow_types::error::{ErrorClass, PlatformError};
use tokio_util::sync::CancellationToken;

use super::rate_limit::RateLimiter;
use crate::platform::CredentialRefresher;

/// Upper bound on the random jitter added to a backoff delay.
const MAX_JITTER: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay: Duration,
}

impl RetryDecision {
    fn stop() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
        }
    }

    fn after(delay: Duration) -> Self {
        Self { retry: true, delay }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    transient_retries: u32,
    auth_retries: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            max_attempts: config.max_attempts.max(1),
            transient_retries: config.transient_retries,
            auth_retries: config.auth_retries,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide whether to retry after `attempt` (1-based) failed with `error`,
    /// for a call that has not refreshed credentials yet.
    ///
    /// - Validation and conflict errors are never retried.
    /// - Auth errors get `auth_retries` credential refreshes, each followed
    ///   by one more attempt.
    /// - Rate-limit errors are retried until `max_attempts`, waiting at least
    ///   the platform's hint.
    /// - Transient errors get `transient_retries` further attempts.
    pub fn should_retry(&self, error: &PlatformError, attempt: u32) -> RetryDecision {
        self.decide(error, attempt, 0)
    }

    /// [`should_retry`](Self::should_retry) for a call that has already
    /// refreshed credentials `refreshes` times.
    pub fn decide(&self, error: &PlatformError, attempt: u32, refreshes: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::stop();
        }

        match error.class() {
            ErrorClass::Validation | ErrorClass::Conflict => RetryDecision::stop(),
            ErrorClass::Auth if refreshes < self.auth_retries => {
                RetryDecision::after(self.backoff(attempt))
            }
            ErrorClass::Auth => RetryDecision::stop(),
            ErrorClass::RateLimited => {
                let hint = error
                    .retry_after_ms()
                    .map(Duration::from_millis)
                    .unwrap_or(Duration::ZERO);
                RetryDecision::after(self.backoff(attempt).max(hint))
            }
            ErrorClass::Transient if attempt <= self.transient_retries => {
                RetryDecision::after(self.backoff(attempt))
            }
            ErrorClass::Transient => RetryDecision::stop(),
        }
    }

    /// Exponential delay for `attempt` with jitter, capped at `max_delay`.
    ///
    /// Jitter is drawn from `[0, min(1s, exp))` where `exp` is the
    /// un-jittered delay, so the delay for attempt `n + 1` is never shorter
    /// than the delay for attempt `n`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.exponential(attempt);
        let jitter_bound = exp.min(MAX_JITTER);
        (exp + random_below(jitter_bound)).min(self.max_delay)
    }

    fn exponential(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Uniform duration in `[0, bound)`. Falls back to zero jitter if the OS
/// random source is unavailable.
fn random_below(bound: Duration) -> Duration {
    let nanos = bound.as_nanos() as u64;
    if nanos == 0 {
        return Duration::ZERO;
    }
    let mut buf = [0u8; 8];
    match getrandom::getrandom(&mut buf) {
        Ok(()) => Duration::from_nanos(u64::from_le_bytes(buf) % nanos),
        Err(err) => {
            tracing::debug!(error = %err, "no randomness for retry jitter");
            Duration::ZERO
        }
    }
}

// ---------------------------------------------------------------------------
// Retrier
// ---------------------------------------------------------------------------

/// Outcome of a retried call. `attempts == 0` means the call was halted
/// before its first attempt started.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, PlatformError>,
    pub attempts: u32,
}

/// Runs platform calls through the rate limiter, the per-attempt timeout and
/// the retry policy.
#[derive(Debug, Clone)]
pub struct Retrier {
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl Retrier {
    pub fn new(limiter: Arc<RateLimiter>, policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            limiter,
            policy,
            attempt_timeout,
        }
    }

    pub fn with_attempt_timeout(&self, attempt_timeout: Duration) -> Self {
        Self {
            attempt_timeout,
            ..self.clone()
        }
    }

    /// Call `op` until it succeeds or the policy gives up.
    ///
    /// `op` receives the 1-based attempt number. When `halt` is cancelled no
    /// further attempt is started; an attempt already running is allowed to
    /// finish.
    pub async fn call<T, R, F, Fut>(
        &self,
        refresher: &R,
        halt: Option<&CancellationToken>,
        label: &str,
        mut op: F,
    ) -> RetryOutcome<T>
    where
        R: CredentialRefresher,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, PlatformError>>,
    {
        let mut attempt = 0u32;
        let mut refreshes = 0u32;
        loop {
            if !self.wait_for_slot(halt).await {
                return halted(attempt, label);
            }

            attempt += 1;
            let result = match tokio::time::timeout(self.attempt_timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(PlatformError::transient(format!(
                    "attempt timed out after {}s",
                    self.attempt_timeout.as_secs()
                ))),
            };

            let err = match result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(err) => err,
            };

            let decision = self.policy.decide(&err, attempt, refreshes);
            if !decision.retry || is_halted(halt) {
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                };
            }

            if err.class() == ErrorClass::Auth {
                if let Err(refresh_err) = refresher.refresh_credentials().await {
                    tracing::warn!(call = label, error = %refresh_err, "credential refresh failed");
                    return RetryOutcome {
                        result: Err(refresh_err),
                        attempts: attempt,
                    };
                }
                refreshes += 1;
            }

            tracing::warn!(
                call = label,
                attempt,
                delay_ms = decision.delay.as_millis() as u64,
                error = %err,
                "retrying platform call"
            );

            if !sleep_unless_halted(decision.delay, halt).await {
                return RetryOutcome {
                    result: Err(err),
                    attempts: attempt,
                };
            }
        }
    }

    /// Acquire a rate limit slot. Returns `false` if halted first.
    async fn wait_for_slot(&self, halt: Option<&CancellationToken>) -> bool {
        match halt {
            Some(token) => {
                if token.is_cancelled() {
                    return false;
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => false,
                    _ = self.limiter.acquire() => true,
                }
            }
            None => {
                self.limiter.acquire().await;
                true
            }
        }
    }
}

fn halted<T>(attempts: u32, label: &str) -> RetryOutcome<T> {
    tracing::debug!(call = label, attempts, "platform call halted");
    RetryOutcome {
        result: Err(PlatformError::transient("halted before attempt")),
        attempts,
    }
}

fn is_halted(halt: Option<&CancellationToken>) -> bool {
    halt.is_some_and(|t| t.is_cancelled())
}

/// Sleep for `delay`. Returns `false` if halted first.
async fn sleep_unless_halted(delay: Duration, halt: Option<&CancellationToken>) -> bool {
    match halt {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        },
        None => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
