//! Errors produced by remote service adapters.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! included in the Display output and accessible via [`ProviderError::code()`].

/// Stable error codes for provider failures.
pub mod error_codes {
    /// Adapter is missing credentials or an endpoint.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// Service rejected the credentials (401/403).
    pub const AUTH_FAILED: &str = "AUTH_FAILED";

    /// Request could not be sent or the connection dropped.
    pub const REQUEST_FAILED: &str = "REQUEST_FAILED";

    /// Service answered with a non-success status.
    pub const HTTP_STATUS: &str = "HTTP_STATUS";

    /// Streaming body broke off or carried an error event.
    pub const STREAM_FAILED: &str = "STREAM_FAILED";

    /// Response body did not have the expected shape.
    pub const DECODE_FAILED: &str = "DECODE_FAILED";

    /// Call exceeded its deadline.
    pub const TIMEOUT_ERROR: &str = "TIMEOUT_ERROR";
}

/// Errors produced by embedding, retrieval, rerank, generation,
/// transcription and synthesis adapters.
///
/// The Display impl formats as `[CODE] message`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Adapter is missing credentials or an endpoint.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),

    /// Service rejected the credentials.
    #[error("[{}] {}", error_codes::AUTH_FAILED, .0)]
    Auth(String),

    /// Request could not be sent.
    #[error("[{}] {}", error_codes::REQUEST_FAILED, .0)]
    Request(String),

    /// Non-success HTTP status with the (possibly extracted) error body.
    #[error("[{}] HTTP {status}: {body}", error_codes::HTTP_STATUS)]
    Http { status: u16, body: String },

    /// Streaming body failed part-way.
    #[error("[{}] {}", error_codes::STREAM_FAILED, .0)]
    Stream(String),

    /// Response body could not be decoded.
    #[error("[{}] {}", error_codes::DECODE_FAILED, .0)]
    Decode(String),

    /// Call exceeded its deadline.
    #[error("[{}] {}", error_codes::TIMEOUT_ERROR, .0)]
    Timeout(String),
}

impl ProviderError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::Auth(_) => error_codes::AUTH_FAILED,
            Self::Request(_) => error_codes::REQUEST_FAILED,
            Self::Http { .. } => error_codes::HTTP_STATUS,
            Self::Stream(_) => error_codes::STREAM_FAILED,
            Self::Decode(_) => error_codes::DECODE_FAILED,
            Self::Timeout(_) => error_codes::TIMEOUT_ERROR,
        }
    }

    /// Returns true if this error represents a transient failure that can be retried.
    ///
    /// Connection failures, timeouts, broken streams, rate limits (429) and
    /// server errors (5xx) are transient. Configuration, auth, other 4xx and
    /// decode failures need a fix, not a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Config(_) | Self::Auth(_) | Self::Decode(_) => false,
            Self::Request(_) | Self::Stream(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
        }
    }

    /// Map an HTTP error status and body to the matching variant.
    ///
    /// `service` names the upstream in the message, e.g. `"OpenAI"`.
    pub fn from_status(service: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let message = extract_error_message(body);
        match status.as_u16() {
            401 | 403 => Self::Auth(format!("{service} authentication failed: {message}")),
            code => Self::Http {
                status: code,
                body: format!("{service}: {message}"),
            },
        }
    }

    /// Wrap a reqwest send failure.
    pub fn request(service: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(format!("{service} request timed out: {err}"))
        } else {
            Self::Request(format!("{service} request failed: {err}"))
        }
    }
}

/// Pull a readable message out of a JSON error body.
///
/// Understands `{"error": {"message": ..}}` (OpenAI), `{"message": ..}`
/// (Cohere, Supabase) and `{"detail": {"message": ..}}` (ElevenLabs);
/// anything else is returned verbatim.
pub fn extract_error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };
    let nested = |key: &str| {
        value
            .get(key)
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(String::from)
    };
    nested("error")
        .or_else(|| nested("detail"))
        .or_else(|| {
            value
                .get("message")
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .or_else(|| value.get("detail").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| body.to_string())
}

/// Convenience alias for provider results.
pub type Result<T> = std::result::Result<T, ProviderError>;
