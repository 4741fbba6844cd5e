//! Error types shared by every provider adapter
//!
//! Adapters never retry internally; they translate whatever the provider
//! surface produced into an [`Error`] envelope. The retry wrapper decides
//! what is worth retrying from [`ErrorKind`] alone.

use thiserror::Error;

/// Closed set of provider failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// API key missing, invalid or expired
    Auth,
    /// Provider throttled the request
    RateLimit,
    /// Account quota or billing exhausted
    Quota,
    /// Request exceeds the model's context window
    ContextLength,
    /// Provider refused the content
    ContentFilter,
    /// Unknown model identifier
    ModelNotFound,
    /// Provider reported 5xx / overload
    Overloaded,
    /// Request deadline elapsed
    Timeout,
    /// Transport-level failure (DNS, TLS, connection reset)
    Network,
    /// Malformed request rejected before any network I/O
    InvalidRequest,
    /// Adapter used before `init` completed
    NotInitialized,
    /// Anything we could not classify
    Unknown,
}

impl ErrorKind {
    /// Whether the retry wrapper may re-attempt this class of failure.
    ///
    /// Auth, ModelNotFound, ContentFilter, ContextLength and InvalidRequest
    /// are never retryable: repeating the identical request cannot succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::Network | ErrorKind::RateLimit | ErrorKind::Overloaded
        )
    }

    /// Stable, human-readable description for each class.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::Auth => "API key invalid or expired",
            ErrorKind::RateLimit => "Rate limit exceeded — retrying",
            ErrorKind::Quota => "Account quota exhausted",
            ErrorKind::ContextLength => "Input too long for this model",
            ErrorKind::ContentFilter => "Content was blocked by the provider",
            ErrorKind::ModelNotFound => "Model not found",
            ErrorKind::Overloaded => "Provider is overloaded — retrying",
            ErrorKind::Timeout => "Request timed out",
            ErrorKind::Network => "Network error — check your internet connection",
            ErrorKind::InvalidRequest => "Invalid request",
            ErrorKind::NotInitialized => "Provider is not initialized",
            ErrorKind::Unknown => "Unexpected provider error",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Quota => "quota",
            ErrorKind::ContextLength => "context_length",
            ErrorKind::ContentFilter => "content_filter",
            ErrorKind::ModelNotFound => "model_not_found",
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::NotInitialized => "not_initialized",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// Error envelope carried across the gateway.
#[derive(Debug, Clone, Error)]
#[error("{}: {message}", kind.as_str())]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    /// Provider-specific error code when the body carried one
    pub provider_code: Option<String>,
    pub http_status: Option<u16>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider_code: None,
            http_status: None,
        }
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimit, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn not_initialized(provider: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::NotInitialized,
            format!("{provider} provider is not initialized"),
        )
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Map an HTTP status to an error envelope.
    ///
    /// 401/403 → Auth, 404 → ModelNotFound, 413 → ContextLength,
    /// 429 → RateLimit, 5xx → Overloaded, everything else → Unknown.
    /// 2xx is a caller bug and maps to Unknown as well.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => ErrorKind::Auth,
            404 => ErrorKind::ModelNotFound,
            413 => ErrorKind::ContextLength,
            429 => ErrorKind::RateLimit,
            s if (500..600).contains(&s) => ErrorKind::Overloaded,
            _ => ErrorKind::Unknown,
        };
        let body = body.into();
        let message = if body.is_empty() {
            format!("{} (HTTP {})", kind.user_message(), status)
        } else {
            body
        };
        Self {
            kind,
            message,
            provider_code: None,
            http_status: Some(status),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Unknown, format!("JSON error: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
