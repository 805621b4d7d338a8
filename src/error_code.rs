//! Standard error codes for synthesis and cache failures.
//!
//! Every failure that leaves the crate maps to one of these codes so callers
//! can decide between "continue without narration" and "retry" without
//! parsing messages.
//!
//! | Prefix | Category | Description                          |
//! |--------|----------|--------------------------------------|
//! | E1xxx  | client   | Request-side and credential errors   |
//! | E2xxx  | rate     | Rate limit and quota errors          |
//! | E3xxx  | server   | Provider-side and connectivity errors|
//! | E4xxx  | local    | Cancellation and storage errors      |
//! | E9xxx  | unknown  | Catch-all                            |
//!
//! ```rust
//! use speech_cache::error_code::StandardErrorCode;
//!
//! let code = StandardErrorCode::from_http_status(429);
//! assert_eq!(code.code(), "E2001");
//! assert!(code.retryable());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandardErrorCode {
    /// E1001: Malformed request or invalid parameters
    InvalidRequest,
    /// E1002: Invalid, expired, or missing API key
    Authentication,
    /// E1003: Valid credentials but insufficient permissions
    PermissionDenied,
    /// E1004: Requested model or voice does not exist
    NotFound,
    /// E2001: Request rate limit exceeded
    RateLimited,
    /// E2002: Account usage quota reached
    QuotaExhausted,
    /// E3001: Internal server error on provider side
    ServerError,
    /// E3002: Provider temporarily overloaded
    Overloaded,
    /// E3003: Request timed out
    Timeout,
    /// E3004: Connection failed before a response was received
    Network,
    /// E4001: Cancelled by the caller
    Cancelled,
    /// E4002: Local cache storage failure
    Storage,
    /// E9999: Unclassified
    Unknown,
}

impl StandardErrorCode {
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "E1001",
            Self::Authentication => "E1002",
            Self::PermissionDenied => "E1003",
            Self::NotFound => "E1004",
            Self::RateLimited => "E2001",
            Self::QuotaExhausted => "E2002",
            Self::ServerError => "E3001",
            Self::Overloaded => "E3002",
            Self::Timeout => "E3003",
            Self::Network => "E3004",
            Self::Cancelled => "E4001",
            Self::Storage => "E4002",
            Self::Unknown => "E9999",
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::Authentication => "authentication",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ServerError => "server_error",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Cancelled => "cancelled",
            Self::Storage => "storage",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this error is retryable by default.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::Overloaded | Self::Timeout | Self::Network
        )
    }

    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidRequest | Self::Authentication | Self::PermissionDenied | Self::NotFound => {
                "client"
            }
            Self::RateLimited | Self::QuotaExhausted => "rate",
            Self::ServerError | Self::Overloaded | Self::Timeout | Self::Network => "server",
            Self::Cancelled | Self::Storage => "local",
            Self::Unknown => "unknown",
        }
    }

    /// Maps an HTTP status code to the most likely code.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::InvalidRequest,
            401 => Self::Authentication,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            408 => Self::Timeout,
            429 => Self::RateLimited,
            500 | 502 => Self::ServerError,
            503 | 529 => Self::Overloaded,
            504 => Self::Timeout,
            s if (500..600).contains(&s) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Maps a provider error code (from a JSON error body) to a standard code.
    pub fn from_provider_code(provider_code: &str) -> Option<Self> {
        let code = match provider_code {
            "invalid_request" | "invalid_request_error" => Self::InvalidRequest,
            "invalid_api_key" | "authentication_error" | "unauthorized" => Self::Authentication,
            "permission_denied" => Self::PermissionDenied,
            "model_not_found" | "voice_not_found" => Self::NotFound,
            "rate_limit_exceeded" | "rate_limited" => Self::RateLimited,
            "insufficient_quota" | "quota_exceeded" => Self::QuotaExhausted,
            "server_error" => Self::ServerError,
            "overloaded" => Self::Overloaded,
            _ => return None,
        };
        Some(code)
    }
}

impl fmt::Display for StandardErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
