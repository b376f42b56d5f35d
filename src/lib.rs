//! # ops-resilience
//!
//! Resilience layer for the ops tool-integration server: the code that sits
//! between the per-API client wrappers (Kibana, Helm, Grafana, ...) and the
//! unreliable services they call.
//!
//! ## Overview
//!
//! Three independent primitives, composed by each call site:
//!
//! - **Circuit breaker**: [`CircuitBreaker`] stops calling a dependency that keeps failing
//! - **Retry**: [`RetryExecutor`] repeats transient failures with exponential backoff and jitter
//! - **Fan-out**: [`FanOut`] runs many independent calls at once and reports every outcome
//!
//! Errors are classified once, when they are created, into the tagged [`Error`]
//! type; retry predicates and reports read that classification instead of
//! probing error shapes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ops_resilience::{CircuitBreaker, Error, RetryConfig, RetryExecutor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ops_resilience::Result<()> {
//!     let breaker = CircuitBreaker::with_defaults("kibana", 5, Duration::from_secs(30));
//!     let retry = RetryExecutor::new(RetryConfig::default());
//!
//!     // retry-then-breaker: every attempt is recorded by the breaker
//!     let health = retry
//!         .execute(|| breaker.call(|| async { Ok::<_, Error>("green") }))
//!         .await?;
//!     println!("kibana is {}", health);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`resilience`] | Circuit breaker, breaker registry, retry, fan-out |
//! | [`error`] | Unified error type and structured context |
//! | [`error_code`] | Stable classification codes |
//! | [`config`] | File and environment configuration |

pub mod config;
pub mod error;
pub mod error_code;
pub mod resilience;

pub use config::ResilienceConfig;
pub use error::{Error, ErrorContext, ErrorKind};
pub use error_code::StandardErrorCode;
pub use resilience::{
    BreakerRegistry, CircuitBreaker, CircuitBreakerConfig, CircuitState, FanOut, FanOutReport,
    FanOutTask, RetryConfig, RetryExecutor,
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
