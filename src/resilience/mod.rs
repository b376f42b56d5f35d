//! # Resilience Primitives Module
//!
//! Protection for calls into unreliable downstream services (Kibana, Helm chart
//! repositories, Grafana, ...). The primitives are independent; call sites
//! compose them in whatever order suits the dependency.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Closed / Open / Half-Open breaker, one per dependency |
//! | [`registry`] | Caller-owned map of breakers keyed by dependency name |
//! | [`retry`] | Retry with exponential backoff, jitter and pluggable predicates |
//! | [`fan_out`] | Concurrent execution with per-task timeouts and an aggregate report |
//!
//! ## Circuit Breaker
//!
//! - **Closed**: calls pass through, consecutive failures are counted
//! - **Open**: calls fail fast with [`Error::BreakerOpen`](crate::Error::BreakerOpen)
//! - **Half-Open**: trial calls probe whether the dependency recovered
//!
//! ```rust
//! use ops_resilience::resilience::circuit_breaker::CircuitBreaker;
//! use std::time::Duration;
//!
//! # async fn demo() -> ops_resilience::Result<()> {
//! let kibana = CircuitBreaker::with_defaults("kibana", 5, Duration::from_secs(30));
//! let spaces = kibana
//!     .call(|| async { Ok::<_, ops_resilience::Error>(vec!["default"]) })
//!     .await?;
//! # let _ = spaces;
//! # Ok(())
//! # }
//! ```
//!
//! ## Retry
//!
//! ```rust
//! use ops_resilience::resilience::retry::{RetryConfig, RetryExecutor};
//! use ops_resilience::Error;
//!
//! # async fn demo() -> ops_resilience::Result<()> {
//! let executor = RetryExecutor::new(RetryConfig::default().with_max_attempts(4));
//! let status = executor
//!     .execute(|| async { Ok::<_, Error>("green") })
//!     .await?;
//! # let _ = status;
//! # Ok(())
//! # }
//! ```
//!
//! ## Fan-Out
//!
//! ```rust
//! use ops_resilience::resilience::fan_out::{FanOut, FanOutTask};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let tasks = vec![
//!     FanOutTask::new("bitnami", async { Ok::<_, ops_resilience::Error>(()) }),
//!     FanOutTask::new("prometheus-community", async { Ok(()) }),
//! ];
//! let report = FanOut::new(Duration::from_secs(10)).run(tasks).await;
//! println!("{}/{} repositories refreshed", report.succeeded, report.total);
//! # }
//! ```

pub mod circuit_breaker;
pub mod fan_out;
pub mod registry;
pub mod retry;

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState,
};
pub use fan_out::{fan_out, FanOut, FanOutReport, FanOutTask, TaskOutcome};
pub use registry::BreakerRegistry;
pub use retry::{RetryConfig, RetryDecision, RetryExecutor, RetryPolicy};
