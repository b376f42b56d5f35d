use crate::{Error, Result};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer invoked synchronously with `(old, new)` on every transition.
///
/// Runs while the breaker's lock is held: it must not call back into the breaker.
pub type StateChangeHook = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed that trip the breaker.
    pub failure_threshold: u32,
    /// Cooldown after the last failure before a trial call is let through.
    pub open_timeout: Duration,
    /// Consecutive Half-Open successes needed to close.
    pub success_threshold: u32,
    /// Admit at most one in-flight trial call while Half-Open.
    pub single_trial: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            success_threshold: 1,
            single_trial: false,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_success_threshold(mut self, successes: u32) -> Self {
        self.success_threshold = successes;
        self
    }

    /// Only let one caller probe the dependency while Half-Open; concurrent
    /// callers are short-circuited until the trial reports back.
    pub fn with_single_trial(mut self, enabled: bool) -> Self {
        self.single_trial = enabled;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout_ms: u64,
    /// Remaining cooldown in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
    pub trial_in_flight: bool,
}

struct State {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure: Option<Instant>,
    // Ticket of the Half-Open trial currently holding the slot.
    trial: Option<u64>,
    trial_seq: u64,
    on_state_change: Option<StateChangeHook>,
}

/// Per-dependency circuit breaker.
///
/// One instance guards exactly one downstream service. The lock is released
/// while the wrapped call runs, so with `single_trial` off every caller that
/// observes an elapsed cooldown may run a trial call concurrently.
pub struct CircuitBreaker {
    name: String,
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("cfg", &self.cfg)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        let cfg = CircuitBreakerConfig {
            failure_threshold: cfg.failure_threshold.max(1),
            success_threshold: cfg.success_threshold.max(1),
            ..cfg
        };
        Self {
            name: name.into(),
            cfg,
            state: Mutex::new(State {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                last_failure: None,
                trial: None,
                trial_seq: 0,
                on_state_change: None,
            }),
        }
    }

    /// Breaker with `max_failures` / `open_timeout` and a single success to close.
    pub fn with_defaults(name: impl Into<String>, max_failures: u32, open_timeout: Duration) -> Self {
        Self::new(
            name,
            CircuitBreakerConfig::new()
                .with_failure_threshold(max_failures)
                .with_open_timeout(open_timeout),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    // Observer panics poison the mutex; the state itself is always left consistent.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` through the breaker.
    ///
    /// Returns [`Error::BreakerOpen`] without calling `f` while the cooldown is
    /// running. Otherwise `f`'s result is recorded and handed back unchanged.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.allow()?;
        let result = f().await;
        match &result {
            Ok(_) => permit.record_success(),
            Err(_) => permit.record_failure(),
        }
        result
    }

    /// Check whether a call may proceed right now.
    ///
    /// For callers that cannot hand the breaker a future: report the outcome
    /// through the returned [`CallPermit`]. A permit dropped without an outcome
    /// only gives back its Half-Open trial slot.
    pub fn allow(&self) -> Result<CallPermit<'_>> {
        let mut st = self.lock();
        let trial = self.admit_locked(&mut st)?;
        Ok(CallPermit {
            breaker: self,
            trial,
            recorded: false,
        })
    }

    /// Returns the trial ticket when the admitted call holds the single Half-Open slot.
    fn admit_locked(&self, st: &mut State) -> Result<Option<u64>> {
        match st.state {
            CircuitState::Closed => Ok(None),
            CircuitState::Open => {
                let elapsed = st
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed > self.cfg.open_timeout {
                    self.transition(st, CircuitState::HalfOpen);
                    if self.cfg.single_trial {
                        return Ok(Some(Self::grant_trial(st)));
                    }
                    Ok(None)
                } else {
                    let retry_in = self.cfg.open_timeout.saturating_sub(elapsed);
                    debug!(
                        dependency = self.name.as_str(),
                        retry_in_ms = retry_in.as_millis() as u64,
                        "circuit breaker short-circuited call"
                    );
                    Err(self.open_error(retry_in))
                }
            }
            CircuitState::HalfOpen => {
                if !self.cfg.single_trial {
                    return Ok(None);
                }
                if st.trial.is_some() {
                    debug!(
                        dependency = self.name.as_str(),
                        "circuit breaker trial already in flight"
                    );
                    return Err(self.open_error(Duration::ZERO));
                }
                Ok(Some(Self::grant_trial(st)))
            }
        }
    }

    fn grant_trial(st: &mut State) -> u64 {
        st.trial_seq = st.trial_seq.wrapping_add(1);
        st.trial = Some(st.trial_seq);
        st.trial_seq
    }

    fn release_trial(st: &mut State, ticket: Option<u64>) {
        if ticket.is_some() && st.trial == ticket {
            st.trial = None;
        }
    }

    fn open_error(&self, retry_in: Duration) -> Error {
        Error::BreakerOpen {
            dependency: self.name.clone(),
            retry_in,
        }
    }

    /// Record a successful call. Never releases the Half-Open trial slot;
    /// that belongs to the [`CallPermit`] holding it.
    pub fn record_success(&self) {
        self.record(true, None);
    }

    /// Record a failed call. Like [`record_success`](Self::record_success),
    /// the trial slot is left alone.
    pub fn record_failure(&self) {
        self.record(false, None);
    }

    fn record(&self, ok: bool, trial: Option<u64>) {
        let mut st = self.lock();
        if ok {
            self.apply_success(&mut st);
        } else {
            self.apply_failure(&mut st);
        }
        Self::release_trial(&mut st, trial);
    }

    fn apply_success(&self, st: &mut State) {
        match st.state {
            CircuitState::Closed => st.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                st.half_open_successes = st.half_open_successes.saturating_add(1);
                if st.half_open_successes >= self.cfg.success_threshold {
                    self.transition(st, CircuitState::Closed);
                }
            }
            // A call admitted before the breaker tripped; the trip stands.
            CircuitState::Open => {}
        }
    }

    fn apply_failure(&self, st: &mut State) {
        match st.state {
            CircuitState::Closed => {
                st.consecutive_failures = st.consecutive_failures.saturating_add(1);
                if st.consecutive_failures >= self.cfg.failure_threshold {
                    st.last_failure = Some(Instant::now());
                    self.transition(st, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                st.last_failure = Some(Instant::now());
                self.transition(st, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Current state. Does not advance Open to Half-Open; only a call does that.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Force Closed with every counter cleared, whatever the current state.
    pub fn reset(&self) {
        let mut st = self.lock();
        self.transition(&mut st, CircuitState::Closed);
        st.consecutive_failures = 0;
        st.half_open_successes = 0;
        st.last_failure = None;
        st.trial = None;
    }

    /// Register the transition observer, replacing any previous one.
    pub fn set_on_state_change<F>(&self, hook: F)
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.lock().on_state_change = Some(Arc::new(hook));
    }

    fn transition(&self, st: &mut State, to: CircuitState) {
        let from = st.state;
        if from == to {
            return;
        }
        st.state = to;
        st.consecutive_failures = 0;
        st.half_open_successes = 0;
        // A trial slot only lives for one Half-Open episode.
        st.trial = None;

        if to == CircuitState::Open {
            warn!(
                dependency = self.name.as_str(),
                from = from.as_str(),
                to = to.as_str(),
                open_timeout_ms = self.cfg.open_timeout.as_millis() as u64,
                "circuit breaker opened"
            );
        } else {
            info!(
                dependency = self.name.as_str(),
                from = from.as_str(),
                to = to.as_str(),
                "circuit breaker state change"
            );
        }

        if let Some(hook) = st.on_state_change.clone() {
            hook(from, to);
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let st = self.lock();
        let open_remaining_ms = match (st.state, st.last_failure) {
            (CircuitState::Open, Some(at)) => Some(
                self.cfg
                    .open_timeout
                    .saturating_sub(at.elapsed())
                    .as_millis() as u64,
            ),
            _ => None,
        };
        CircuitBreakerSnapshot {
            dependency: self.name.clone(),
            state: st.state,
            consecutive_failures: st.consecutive_failures,
            half_open_successes: st.half_open_successes,
            failure_threshold: self.cfg.failure_threshold,
            success_threshold: self.cfg.success_threshold,
            open_timeout_ms: self.cfg.open_timeout.as_millis() as u64,
            open_remaining_ms,
            trial_in_flight: st.trial.is_some(),
        }
    }
}

/// Admission to one call through a [`CircuitBreaker`].
///
/// Consumed by recording the outcome. If dropped unreported (the wrapped future
/// was cancelled), only the Half-Open trial slot it holds is given back.
#[derive(Debug)]
#[must_use = "report the call's outcome with record_success or record_failure"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
    recorded: bool,
}

impl CallPermit<'_> {
    /// Whether this call holds the single Half-Open trial slot.
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    pub fn record_success(mut self) {
        self.finish(true);
    }

    pub fn record_failure(mut self) {
        self.finish(false);
    }

    fn finish(&mut self, ok: bool) {
        self.recorded = true;
        self.breaker.record(ok, self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.recorded && self.trial.is_some() {
            let mut st = self.breaker.lock();
            CircuitBreaker::release_trial(&mut st, self.trial);
        }
    }
}
