use crate::error_code::StandardErrorCode;
use std::sync::Arc;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Cache key the failing operation was working on, if any.
    pub cache_key: Option<String>,
    /// Additional context about the error (e.g. provider response body).
    pub details: Option<String>,
    /// Source of the error (e.g. "http_transport", "local_store").
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
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

/// Unified error type for the speech cache.
///
/// Provider failures are classified once, where the HTTP response is read
/// (see [`crate::transport`]); nothing downstream inspects messages to decide
/// whether an error is retryable.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing provider credentials. Never retried.
    #[error("Authentication failed (HTTP {status}): {message}")]
    Authentication { status: u16, message: String },

    /// The provider signalled that throughput was exceeded.
    #[error("Rate limited (HTTP {status}): {message}{}", format_quota(.remaining, .retry_after_ms))]
    RateLimited {
        status: u16,
        message: String,
        retry_after_ms: Option<u64>,
        remaining: Option<u64>,
    },

    /// Connectivity failure before a response was received.
    #[error("Network error: {message}{}", format_context(.context))]
    Network {
        message: String,
        context: ErrorContext,
    },

    /// Any other non-success response from a remote service.
    #[error("Remote error: HTTP {status} ({code}): {message}")]
    Remote {
        status: u16,
        code: StandardErrorCode,
        message: String,
        retryable: bool,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An error produced once and handed to every caller that joined the same
    /// in-flight request.
    #[error("{0}")]
    Shared(Arc<Error>),
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref key) = ctx.cache_key {
        parts.push(format!("key: {}", key));
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

fn format_quota(remaining: &Option<u64>, retry_after_ms: &Option<u64>) -> String {
    match (*remaining, *retry_after_ms) {
        (None, None) => String::new(),
        (Some(r), None) => format!(" (remaining: {})", r),
        (None, Some(ms)) => format!(" (retry after {}ms)", ms),
        (Some(r), Some(ms)) => format!(" (remaining: {}, retry after {}ms)", r, ms),
    }
}

impl Error {
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn network_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Network {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Build the error for a non-success provider response.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after_ms: Option<u64>, remaining: Option<u64>) -> Self {
        let message = message.into();
        let code = StandardErrorCode::from_http_status(status);
        match code {
            StandardErrorCode::Authentication | StandardErrorCode::PermissionDenied => {
                Error::Authentication { status, message }
            }
            StandardErrorCode::RateLimited => Error::RateLimited {
                status,
                message,
                retry_after_ms,
                remaining,
            },
            _ => Error::Remote {
                status,
                code,
                message,
                retryable: code.retryable(),
            },
        }
    }

    /// Unwrap a shared error when this caller holds the only reference.
    pub fn from_shared(err: Arc<Error>) -> Self {
        Arc::try_unwrap(err).unwrap_or_else(Error::Shared)
    }

    /// Follow `Shared` wrappers down to the originating error.
    pub fn root(&self) -> &Error {
        match self {
            Error::Shared(inner) => inner.root(),
            other => other,
        }
    }

    pub fn standard_code(&self) -> StandardErrorCode {
        match self.root() {
            Error::Authentication { status, .. } => StandardErrorCode::from_http_status(*status),
            Error::RateLimited { .. } => StandardErrorCode::RateLimited,
            Error::Network { .. } => StandardErrorCode::Network,
            Error::Remote { code, .. } => *code,
            Error::Configuration { .. } | Error::Validation { .. } => StandardErrorCode::InvalidRequest,
            Error::Cancelled => StandardErrorCode::Cancelled,
            Error::Io(_) => StandardErrorCode::Storage,
            _ => StandardErrorCode::Unknown,
        }
    }

    /// HTTP status reported by the provider, if the failure came from a response.
    pub fn status(&self) -> Option<u16> {
        match self.root() {
            Error::Authentication { status, .. }
            | Error::RateLimited { status, .. }
            | Error::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self.root(), Error::RateLimited { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Error::RateLimited { .. } | Error::Network { .. } => true,
            Error::Remote { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Fatal errors stop dependent queued work instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self.root(), Error::Authentication { .. })
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self.root() {
            Error::Network { context, .. }
            | Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}
