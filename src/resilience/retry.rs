//! Retry with exponential backoff and jitter.
//!
//! [`RetryConfig`] is an immutable policy value shareable across call sites;
//! [`RetryExecutor`] drives any [`RetryPolicy`] over a caller-supplied closure.

use crate::error_code::StandardErrorCode;
use crate::{Error, Result};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Decides whether an error is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Called with `(failed_attempt, error)` before each backoff sleep.
pub type RetryHook = Arc<dyn Fn(u32, &Error) + Send + Sync>;

/// Upper bound of the multiplicative jitter: delays are scaled by `1 + U(0, 0.25)`.
const JITTER_FACTOR: f64 = 0.25;

/// Longest schedule [`RetryConfig::delay_schedule`] will list.
const MAX_SCHEDULE_ROWS: usize = 32;

#[derive(Clone)]
pub struct RetryConfig {
    /// Total attempts including the first; `0` behaves as `1`.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
    pub retryable: RetryPredicate,
    pub on_retry: Option<RetryHook>,
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter", &self.jitter)
            .field("on_retry", &self.on_retry.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            retryable: Arc::new(default_retryable),
            on_retry: None,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    pub fn with_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.retryable = predicate;
        self
    }

    pub fn with_on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, &Error) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Attempt budget after normalisation.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Pure exponential delay before the attempt following `failed_attempt` (1-based):
    /// `initial_delay * multiplier^(failed_attempt - 1)`, capped at `max_delay`.
    pub fn base_delay(&self, failed_attempt: u32) -> Duration {
        if failed_attempt == 0 {
            return Duration::ZERO;
        }
        let exp = (failed_attempt - 1).min(i32::MAX as u32) as i32;
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exp);
        if nanos.is_nan() || nanos <= 0.0 {
            return Duration::ZERO;
        }
        if nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.round() as u64)
    }

    /// [`base_delay`](Self::base_delay) with jitter applied. Jitter only lengthens
    /// the delay and the result never exceeds `max_delay`.
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let base = self.base_delay(failed_attempt);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(0.0..JITTER_FACTOR);
        base.mul_f64(factor).min(self.max_delay)
    }

    /// Un-jittered `(failed_attempt, delay)` rows, stopping once the delay
    /// reaches `max_delay` or stops growing. The last row's delay applies to
    /// every later retry.
    pub fn delay_schedule(&self) -> Vec<(u32, Duration)> {
        let mut rows: Vec<(u32, Duration)> = Vec::new();
        for attempt in 1..self.attempts() {
            let delay = self.base_delay(attempt);
            if rows.last().map_or(false, |&(_, prev)| prev >= delay) {
                break;
            }
            rows.push((attempt, delay));
            if delay >= self.max_delay || rows.len() >= MAX_SCHEDULE_ROWS {
                break;
            }
        }
        rows
    }

    fn delay_for(&self, failed_attempt: u32, error: &Error) -> Duration {
        let delay = self.backoff(failed_attempt);
        match error.retry_after() {
            Some(hint) => delay.max(hint).min(self.max_delay),
            None => delay,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then try again.
    Retry { delay: Duration },
    /// Not retryable; surface the error as is.
    Fail,
    /// Retryable but out of attempts.
    Exhausted,
}

#[async_trait]
pub trait RetryPolicy: Send + Sync {
    /// `attempt` is the 1-based index of the attempt that just failed.
    async fn decide(&self, attempt: u32, error: &Error) -> RetryDecision;

    fn max_attempts(&self) -> u32;

    fn on_retry(&self, _attempt: u32, _error: &Error) {}
}

#[async_trait]
impl RetryPolicy for RetryConfig {
    async fn decide(&self, attempt: u32, error: &Error) -> RetryDecision {
        if !(self.retryable)(error) {
            return RetryDecision::Fail;
        }
        if attempt >= self.attempts() {
            return RetryDecision::Exhausted;
        }
        RetryDecision::Retry {
            delay: self.delay_for(attempt, error),
        }
    }

    fn max_attempts(&self) -> u32 {
        self.attempts()
    }

    fn on_retry(&self, attempt: u32, error: &Error) {
        if let Some(hook) = &self.on_retry {
            hook(attempt, error);
        }
    }
}

/// Runs a fallible operation under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor<P = RetryConfig> {
    policy: P,
}

impl<P: RetryPolicy> RetryExecutor<P> {
    pub fn new(policy: P) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub async fn execute<F, Fut, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let token = CancellationToken::new();
        self.execute_with_cancel(&token, |_| f()).await
    }

    /// Like [`execute`](Self::execute), but each attempt receives a child of
    /// `token`, and cancelling `token` aborts any pending backoff sleep with
    /// [`Error::Cancelled`].
    pub async fn execute_with_cancel<F, Fut, T>(
        &self,
        token: &CancellationToken,
        mut f: F,
    ) -> Result<T>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts().max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            let err = match f(token.child_token()).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match self.policy.decide(attempt, &err).await {
                RetryDecision::Fail => return Err(err),
                RetryDecision::Exhausted => {
                    warn!(
                        attempts = attempt,
                        error = %err,
                        "retry budget exhausted"
                    );
                    return Err(Error::RetryExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                RetryDecision::Retry { delay } => {
                    debug!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    self.policy.on_retry(attempt, &err);
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            return Err(Error::cancelled(format!(
                                "retry aborted during backoff after {} attempt(s)",
                                attempt
                            )));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// Run `f` under `config` without cancellation.
pub async fn execute<F, Fut, T>(config: &RetryConfig, f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryExecutor::new(config.clone()).execute(f).await
}

/// Run `f` under `config`, aborting backoff sleeps when `token` is cancelled.
pub async fn execute_with_cancel<F, Fut, T>(
    token: &CancellationToken,
    config: &RetryConfig,
    f: F,
) -> Result<T>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryExecutor::new(config.clone())
        .execute_with_cancel(token, f)
        .await
}

/// Transient errors (network failure, 5xx, 429, timeout) are retried; anything else is not.
pub fn default_retryable(err: &Error) -> bool {
    err.is_transient()
}

/// Retry only errors whose HTTP status is in `statuses`.
pub fn retry_on_status<I>(statuses: I) -> RetryPredicate
where
    I: IntoIterator<Item = u16>,
{
    let set: HashSet<u16> = statuses.into_iter().collect();
    Arc::new(move |err: &Error| err.status_code().map_or(false, |s| set.contains(&s)))
}

/// Retry only errors classified with one of `codes`.
pub fn retry_on_codes<I>(codes: I) -> RetryPredicate
where
    I: IntoIterator<Item = StandardErrorCode>,
{
    let set: HashSet<StandardErrorCode> = codes.into_iter().collect();
    Arc::new(move |err: &Error| err.standard_code().map_or(false, |c| set.contains(&c)))
}

/// Retry when any of `predicates` matches.
pub fn any_of(predicates: Vec<RetryPredicate>) -> RetryPredicate {
    Arc::new(move |err: &Error| predicates.iter().any(|p| p(err)))
}
