use crate::error_code::StandardErrorCode;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for classification and debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// HTTP status returned by the downstream service, if any.
    pub status_code: Option<u16>,
    /// Stable classification code.
    pub standard_code: Option<StandardErrorCode>,
    /// Minimum wait requested by the downstream service (e.g. `Retry-After`).
    pub retry_after: Option<Duration>,
    /// Field path or configuration key that caused the error (e.g. "retry.multiplier")
    pub field_path: Option<String>,
    /// Additional free-form details
    pub details: Option<String>,
    /// Component that produced the error (e.g. "kibana_client", "config_loader")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_standard_code(mut self, code: StandardErrorCode) -> Self {
        self.standard_code = Some(code);
        self
    }

    pub fn with_retry_after(mut self, after: Duration) -> Self {
        self.retry_after = Some(after);
        self
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Stable classification tag for an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transient,
    Permanent,
    BreakerOpen,
    RetryExhausted,
    Timeout,
    Cancelled,
    Configuration,
    Io,
    Serialization,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::BreakerOpen => "breaker_open",
            ErrorKind::RetryExhausted => "retry_exhausted",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Io => "io",
            ErrorKind::Serialization => "serialization",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the resilience layer and the API wrappers that use it.
#[derive(Debug, Error)]
pub enum Error {
    /// Expected to clear up on its own: network failure, 5xx, 429, timeout.
    #[error("Transient error: {message}{}", format_context(.context))]
    Transient {
        message: String,
        context: ErrorContext,
    },

    /// Will fail again if repeated: 4xx other than 429, validation failures.
    #[error("Permanent error: {message}{}", format_context(.context))]
    Permanent {
        message: String,
        context: ErrorContext,
    },

    /// The call was short-circuited; the dependency was never invoked.
    #[error("Circuit breaker open for '{dependency}' (retry in {}ms)", .retry_in.as_millis())]
    BreakerOpen {
        dependency: String,
        retry_in: Duration,
    },

    #[error("Retry budget exhausted after {attempts} attempt(s): {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },

    #[error("Task '{task}' timed out after {}ms", .timeout.as_millis())]
    FanOutTimeout { task: String, timeout: Duration },

    #[error("Operation cancelled: {message}")]
    Cancelled { message: String },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(status) = ctx.status_code {
        parts.push(format!("status: {}", status));
    }
    if let Some(code) = ctx.standard_code {
        parts.push(format!("code: {} ({})", code.code(), code.name()));
    }
    if let Some(after) = ctx.retry_after {
        parts.push(format!("retry_after_ms: {}", after.as_millis()));
    }
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn transient(msg: impl Into<String>) -> Self {
        Error::Transient {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Error::Permanent {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Error::Cancelled {
            message: msg.into(),
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Classify a failed HTTP exchange: `status >= 500`, `429`, or a status whose
    /// standard code is transient (`408`) is transient, everything else permanent.
    pub fn from_http_status(status: u16, msg: impl Into<String>) -> Self {
        let code = StandardErrorCode::from_http_status(status);
        let context = ErrorContext::new()
            .with_status_code(status)
            .with_standard_code(code);
        if status >= 500 || status == 429 || code.is_transient() {
            Error::Transient {
                message: msg.into(),
                context,
            }
        } else {
            Error::Permanent {
                message: msg.into(),
                context,
            }
        }
    }

    /// Classify by application error code; only the transient code set is retryable.
    pub fn from_code(code: StandardErrorCode, msg: impl Into<String>) -> Self {
        let context = ErrorContext::new().with_standard_code(code);
        if code.is_transient() {
            Error::Transient {
                message: msg.into(),
                context,
            }
        } else {
            Error::Permanent {
                message: msg.into(),
                context,
            }
        }
    }

    /// Turn a non-success response into a classified error, honouring `Retry-After` (seconds).
    pub async fn from_response(resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let url = resp.url().to_string();
        let body = resp.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            format!("HTTP {} from {}", status, url)
        } else {
            body
        };
        let err = Error::from_http_status(status, message).with_source("http_response");
        match retry_after {
            Some(after) => err.with_retry_after(after),
            None => err,
        }
    }

    /// Replace the structured context on variants that carry one.
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        if let Some(context) = self.context_mut() {
            *context = ctx;
        }
        self
    }

    pub fn with_retry_after(mut self, after: Duration) -> Self {
        if let Some(context) = self.context_mut() {
            context.retry_after = Some(after);
        }
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        if let Some(context) = self.context_mut() {
            context.source = Some(source.into());
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transient { .. } => ErrorKind::Transient,
            Error::Permanent { .. } => ErrorKind::Permanent,
            Error::BreakerOpen { .. } => ErrorKind::BreakerOpen,
            Error::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            Error::FanOutTimeout { .. } => ErrorKind::Timeout,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::Io(_) => ErrorKind::Io,
            Error::Serialization(_) | Error::Yaml(_) => ErrorKind::Serialization,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Transient { context, .. }
            | Error::Permanent { context, .. }
            | Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    fn context_mut(&mut self) -> Option<&mut ErrorContext> {
        match self {
            Error::Transient { context, .. }
            | Error::Permanent { context, .. }
            | Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        self.context().and_then(|c| c.status_code)
    }

    pub fn standard_code(&self) -> Option<StandardErrorCode> {
        match self {
            Error::FanOutTimeout { .. } => Some(StandardErrorCode::Timeout),
            Error::Cancelled { .. } => Some(StandardErrorCode::Cancelled),
            _ => self.context().and_then(|c| c.standard_code),
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.context().and_then(|c| c.retry_after)
    }

    /// Whether a repeat of the same call may succeed.
    ///
    /// The status/code rule is applied once, when the error is classified; this
    /// only reads the resulting tag.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient { .. } | Error::FanOutTimeout { .. })
    }

    pub fn is_breaker_open(&self) -> bool {
        matches!(self, Error::BreakerOpen { .. })
    }

    /// For `RetryExhausted`, the error from the final attempt.
    pub fn last_error(&self) -> Option<&Error> {
        match self {
            Error::RetryExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        let context = ErrorContext::new().with_source("reqwest");
        if err.is_timeout() {
            return Error::Transient {
                message,
                context: context.with_standard_code(StandardErrorCode::Timeout),
            };
        }
        if let Some(status) = err.status() {
            return Error::from_http_status(status.as_u16(), message).with_source("reqwest");
        }
        if err.is_connect() || err.is_request() || err.is_body() {
            return Error::Transient {
                message,
                context: context.with_standard_code(StandardErrorCode::ConnectionFailed),
            };
        }
        Error::Permanent {
            message,
            context: context.with_standard_code(StandardErrorCode::Unknown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_classification() {
        assert_eq!(Error::from_http_status(503, "down").kind(), ErrorKind::Transient);
        assert_eq!(Error::from_http_status(429, "slow down").kind(), ErrorKind::Transient);
        assert_eq!(Error::from_http_status(404, "missing").kind(), ErrorKind::Permanent);
        assert_eq!(Error::from_http_status(400, "bad").kind(), ErrorKind::Permanent);

        let err = Error::from_http_status(502, "bad gateway");
        assert_eq!(err.status_code(), Some(502));
        assert_eq!(err.standard_code(), Some(StandardErrorCode::Unavailable));
    }

    #[test]
    fn test_request_timeout_status_is_transient() {
        let err = Error::from_http_status(408, "request timeout");
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.standard_code(), Some(StandardErrorCode::Timeout));
        assert_eq!(
            err.is_transient(),
            err.standard_code().map_or(false, |c| c.is_transient())
        );
    }

    #[test]
    fn test_code_classification() {
        assert!(Error::from_code(StandardErrorCode::Timeout, "slow").is_transient());
        assert!(!Error::from_code(StandardErrorCode::NotFound, "gone").is_transient());
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::from_http_status(503, "kibana unavailable")
            .with_retry_after(Duration::from_secs(2))
            .with_source("kibana_client");
        let msg = err.to_string();
        assert!(msg.contains("kibana unavailable"));
        assert!(msg.contains("status: 503"));
        assert!(msg.contains("retry_after_ms: 2000"));
        assert!(msg.contains("source: kibana_client"));

        assert_eq!(Error::transient("plain").to_string(), "Transient error: plain");
    }

    #[test]
    fn test_retry_exhausted_exposes_last_error() {
        use std::error::Error as _;

        let err = Error::RetryExhausted {
            attempts: 3,
            last: Box::new(Error::from_http_status(500, "boom")),
        };
        assert_eq!(err.kind(), ErrorKind::RetryExhausted);
        assert!(!err.is_transient());
        assert_eq!(err.last_error().and_then(|e| e.status_code()), Some(500));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("3 attempt(s)"));
    }

    #[test]
    fn test_context_free_variants() {
        let err = Error::FanOutTimeout {
            task: "refresh-bitnami".into(),
            timeout: Duration::from_millis(50),
        };
        assert!(err.is_transient());
        assert_eq!(err.standard_code(), Some(StandardErrorCode::Timeout));
        assert!(err.context().is_none());
        // with_* on a context-free variant is a no-op
        let err = err.with_retry_after(Duration::from_secs(1));
        assert!(err.retry_after().is_none());
    }
}
