//! Stable error classification codes shared by every downstream API wrapper.
//!
//! Each wrapper (Kibana, Helm repositories, Grafana, ...) reports failures with
//! one of these codes so the resilience layer can decide what to retry without
//! knowing anything about the individual API.
//!
//! ## Code Categories
//!
//! | Prefix | Category    | Description                          |
//! |--------|-------------|--------------------------------------|
//! | E1xxx  | client      | Request-side errors, never retried   |
//! | E2xxx  | rate        | Throttling by the downstream service |
//! | E3xxx  | server      | Downstream or network faults         |
//! | E4xxx  | operational | Lifecycle and state conflicts        |
//! | E9xxx  | unknown     | Catch-all / unclassified             |
//!
//! ## Example
//!
//! ```rust
//! use ops_resilience::error_code::StandardErrorCode;
//!
//! let code = StandardErrorCode::from_http_status(503);
//! assert_eq!(code.code(), "E3002");
//! assert!(code.is_transient());
//! assert_eq!(code.category(), "server");
//! ```

use std::fmt;

/// Canonical classification of a downstream failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardErrorCode {
    /// E1001: Malformed request or failed validation
    InvalidRequest,
    /// E1002: Missing or rejected credentials
    Authentication,
    /// E1003: Credentials valid but not allowed
    PermissionDenied,
    /// E1004: Resource does not exist
    NotFound,
    /// E2001: Downstream throttled the caller (HTTP 429)
    RateLimited,
    /// E3001: Internal error on the downstream service
    ServerError,
    /// E3002: Downstream temporarily unavailable or overloaded
    Unavailable,
    /// E3003: Request timed out before a response arrived
    Timeout,
    /// E3004: Connection could not be established or was reset
    ConnectionFailed,
    /// E4001: State conflict (e.g. concurrent modification)
    Conflict,
    /// E4002: Cancelled by the caller
    Cancelled,
    /// E9999: Could not be classified
    Unknown,
}

impl StandardErrorCode {
    /// Returns the canonical code string (e.g. `"E3003"`).
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "E1001",
            Self::Authentication => "E1002",
            Self::PermissionDenied => "E1003",
            Self::NotFound => "E1004",
            Self::RateLimited => "E2001",
            Self::ServerError => "E3001",
            Self::Unavailable => "E3002",
            Self::Timeout => "E3003",
            Self::ConnectionFailed => "E3004",
            Self::Conflict => "E4001",
            Self::Cancelled => "E4002",
            Self::Unknown => "E9999",
        }
    }

    /// Returns the snake_case name (e.g. `"rate_limited"`).
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::Authentication => "authentication",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Unavailable => "unavailable",
            Self::Timeout => "timeout",
            Self::ConnectionFailed => "connection_failed",
            Self::Conflict => "conflict",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the failure is expected to clear up on its own, so a retry may succeed.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::ServerError
                | Self::Unavailable
                | Self::Timeout
                | Self::ConnectionFailed
        )
    }

    /// Returns the category: `"client"`, `"rate"`, `"server"`, `"operational"`, or `"unknown"`.
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidRequest
            | Self::Authentication
            | Self::PermissionDenied
            | Self::NotFound => "client",
            Self::RateLimited => "rate",
            Self::ServerError | Self::Unavailable | Self::Timeout | Self::ConnectionFailed => {
                "server"
            }
            Self::Conflict | Self::Cancelled => "operational",
            Self::Unknown => "unknown",
        }
    }

    /// Maps an API-specific error code string to a `StandardErrorCode`.
    ///
    /// Accepts the standard names plus aliases seen in the wrapped ops APIs
    /// (`"deadline_exceeded"`, `"ECONNRESET"`, `"too_many_requests"`, ...).
    pub fn from_code_str(code: &str) -> Option<Self> {
        let code = match code {
            "invalid_request" | "bad_request" | "validation_failed" => Self::InvalidRequest,
            "authentication" | "unauthorized" | "invalid_api_key" => Self::Authentication,
            "permission_denied" | "forbidden" => Self::PermissionDenied,
            "not_found" | "resource_not_found" => Self::NotFound,
            "rate_limited" | "too_many_requests" | "throttled" => Self::RateLimited,
            "server_error" | "internal_error" => Self::ServerError,
            "unavailable" | "service_unavailable" | "overloaded" => Self::Unavailable,
            "timeout" | "deadline_exceeded" | "ETIMEDOUT" => Self::Timeout,
            "connection_failed" | "connection_refused" | "ECONNREFUSED" | "ECONNRESET" => {
                Self::ConnectionFailed
            }
            "conflict" => Self::Conflict,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => return None,
        };
        Some(code)
    }

    /// Maps an HTTP status code to the closest `StandardErrorCode`.
    ///
    /// Any 5xx without a dedicated mapping is `ServerError`, so the
    /// "status >= 500 is transient" rule holds through this mapping.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::InvalidRequest,
            401 => Self::Authentication,
            403 => Self::PermissionDenied,
            404 | 410 => Self::NotFound,
            408 => Self::Timeout,
            409 => Self::Conflict,
            429 => Self::RateLimited,
            502 | 503 | 529 => Self::Unavailable,
            504 => Self::Timeout,
            s if s >= 500 => Self::ServerError,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for StandardErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
