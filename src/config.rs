//! Resilience configuration loading.
//!
//! Settings come from a YAML or JSON document, optionally overridden by
//! `OPS_*` environment variables, and convert into the runtime configs of
//! the [`resilience`](crate::resilience) module.
//!
//! ```yaml
//! breaker:
//!   failure_threshold: 5
//!   open_timeout_ms: 30000
//! retry:
//!   max_attempts: 4
//!   jitter: false
//! fan_out:
//!   task_timeout_ms: 15000
//!   max_concurrency: 8
//! ```

use crate::resilience::{CircuitBreakerConfig, FanOut, RetryConfig};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub breaker: BreakerSettings,
    pub retry: RetrySettings,
    pub fan_out: FanOutSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub open_timeout_ms: u64,
    pub success_threshold: u32,
    pub single_trial: bool,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_ms: 30_000,
            success_threshold: 1,
            single_trial: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
    /// Restrict retries to these HTTP statuses instead of the transient classification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_on_status: Option<Vec<u16>>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
            retry_on_status: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanOutSettings {
    pub task_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

impl Default for FanOutSettings {
    fn default() -> Self {
        Self {
            task_timeout_ms: 30_000,
            max_concurrency: None,
        }
    }
}

fn config_error(msg: impl Into<String>, field: &str) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("resilience_config"),
    )
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

impl ResilienceConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a `.yaml`/`.yml` file, or JSON for any other extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let cfg = Self::default().with_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `OPS_*` environment overrides. Values that fail to parse are ignored.
    ///
    /// - `OPS_BREAKER_FAILURE_THRESHOLD`, `OPS_BREAKER_OPEN_TIMEOUT_MS`, `OPS_BREAKER_SUCCESS_THRESHOLD`
    /// - `OPS_RETRY_MAX_ATTEMPTS`, `OPS_RETRY_INITIAL_DELAY_MS`, `OPS_RETRY_MAX_DELAY_MS`,
    ///   `OPS_RETRY_MULTIPLIER`, `OPS_RETRY_JITTER`
    /// - `OPS_FANOUT_TASK_TIMEOUT_MS`, `OPS_FANOUT_MAX_CONCURRENCY`
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("OPS_BREAKER_FAILURE_THRESHOLD") {
            self.breaker.failure_threshold = v;
        }
        if let Some(v) = env_parse("OPS_BREAKER_OPEN_TIMEOUT_MS") {
            self.breaker.open_timeout_ms = v;
        }
        if let Some(v) = env_parse("OPS_BREAKER_SUCCESS_THRESHOLD") {
            self.breaker.success_threshold = v;
        }
        if let Some(v) = env_parse("OPS_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = v;
        }
        if let Some(v) = env_parse("OPS_RETRY_INITIAL_DELAY_MS") {
            self.retry.initial_delay_ms = v;
        }
        if let Some(v) = env_parse("OPS_RETRY_MAX_DELAY_MS") {
            self.retry.max_delay_ms = v;
        }
        if let Some(v) = env_parse("OPS_RETRY_MULTIPLIER") {
            self.retry.multiplier = v;
        }
        if let Some(v) = env_parse("OPS_RETRY_JITTER") {
            self.retry.jitter = v;
        }
        if let Some(v) = env_parse("OPS_FANOUT_TASK_TIMEOUT_MS") {
            self.fan_out.task_timeout_ms = v;
        }
        if let Some(v) = env_parse::<usize>("OPS_FANOUT_MAX_CONCURRENCY") {
            self.fan_out.max_concurrency = Some(v);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let retry = &self.retry;
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(config_error(
                format!("multiplier must be a finite number >= 1.0, got {}", retry.multiplier),
                "retry.multiplier",
            ));
        }
        if retry.max_delay_ms < retry.initial_delay_ms {
            return Err(config_error(
                format!(
                    "max_delay_ms ({}) is smaller than initial_delay_ms ({})",
                    retry.max_delay_ms, retry.initial_delay_ms
                ),
                "retry.max_delay_ms",
            ));
        }
        if self.fan_out.task_timeout_ms == 0 {
            return Err(config_error(
                "task_timeout_ms must be greater than zero",
                "fan_out.task_timeout_ms",
            ));
        }
        if self.fan_out.max_concurrency == Some(0) {
            return Err(config_error(
                "max_concurrency must be greater than zero when set",
                "fan_out.max_concurrency",
            ));
        }
        Ok(())
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_failure_threshold(self.failure_threshold)
            .with_open_timeout(Duration::from_millis(self.open_timeout_ms))
            .with_success_threshold(self.success_threshold)
            .with_single_trial(self.single_trial)
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        let cfg = RetryConfig::new()
            .with_max_attempts(self.max_attempts)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_multiplier(self.multiplier)
            .with_jitter(self.jitter);
        match &self.retry_on_status {
            Some(statuses) => cfg.with_predicate(crate::resilience::retry::retry_on_status(
                statuses.iter().copied(),
            )),
            None => cfg,
        }
    }
}

impl FanOutSettings {
    pub fn to_fan_out(&self) -> FanOut {
        let fan_out = FanOut::new(Duration::from_millis(self.task_timeout_ms));
        match self.max_concurrency {
            Some(limit) => fan_out.with_max_concurrency(limit),
            None => fan_out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_runtime_defaults() {
        let cfg = ResilienceConfig::default();
        let retry = cfg.retry.to_retry_config();
        let runtime = RetryConfig::default();
        assert_eq!(retry.max_attempts, runtime.max_attempts);
        assert_eq!(retry.initial_delay, runtime.initial_delay);
        assert_eq!(retry.max_delay, runtime.max_delay);
        assert_eq!(retry.multiplier, runtime.multiplier);
        assert_eq!(retry.jitter, runtime.jitter);

        let breaker = cfg.breaker.to_breaker_config();
        assert_eq!(breaker.failure_threshold, 5);
        assert_eq!(breaker.open_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = ResilienceConfig::from_yaml_str("retry:\n  max_attempts: 6\n").unwrap();
        assert_eq!(cfg.retry.max_attempts, 6);
        assert_eq!(cfg.retry.initial_delay_ms, 100);
        assert_eq!(cfg.breaker, BreakerSettings::default());
    }

    #[test]
    fn test_validation_errors_carry_field_path() {
        let err = ResilienceConfig::from_json_str(r#"{"retry": {"multiplier": 0.5}}"#).unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("retry.multiplier")
        );

        let err = ResilienceConfig::from_json_str(
            r#"{"retry": {"initial_delay_ms": 500, "max_delay_ms": 100}}"#,
        )
        .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("retry.max_delay_ms")
        );
    }

    #[test]
    fn test_retry_on_status_predicate() {
        let cfg = ResilienceConfig::from_yaml_str("retry:\n  retry_on_status: [502]\n").unwrap();
        let retry = cfg.retry.to_retry_config();
        assert!((retry.retryable)(&Error::from_http_status(502, "x")));
        assert!(!(retry.retryable)(&Error::from_http_status(503, "x")));
    }

    #[test]
    fn test_fan_out_conversion() {
        let settings = FanOutSettings {
            task_timeout_ms: 250,
            max_concurrency: Some(4),
        };
        let fan_out = settings.to_fan_out();
        assert_eq!(fan_out.task_timeout(), Duration::from_millis(250));
        assert_eq!(fan_out.max_concurrency(), Some(4));
    }
}
