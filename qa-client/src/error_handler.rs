//! Unified error handling for `qa-client`.
//!
//! Two families of errors exist:
//! - [`ConfigError`]: problems detected while reading/validating configuration;
//! - [`ApiError`]: the single normalized value every failed backend call
//!   (connect failure, non-2xx status, missing body, timeouts) is turned into.
//!   It carries the taxonomy [`ErrorKind`], a technical message, a
//!   user-facing message and the retry hints the caller needs to offer a
//!   "Retry" action.
//!
//! [`StoreError`] covers the chat store. [`QaClientError`] wraps all of them
//! for callers that deal with any.
//! All technical messages include the prefix `[QA Client]` to simplify
//! attribution in logs.

use std::fmt;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/* ------------------------------------------------------------------------- */
/* Public result alias                                                       */
/* ------------------------------------------------------------------------- */

/// Unified result alias for the entire crate.
pub type Result<T> = std::result::Result<T, QaClientError>;

/* ------------------------------------------------------------------------- */
/* Top-level error                                                           */
/* ------------------------------------------------------------------------- */

/// Top-level error for the `qa-client` crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum QaClientError {
    /// Configuration/validation errors (startup).
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A backend call failed; already normalized.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Chat persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/* ------------------------------------------------------------------------- */
/* Store errors                                                              */
/* ------------------------------------------------------------------------- */

#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("[QA Client] unknown chat: {0}")]
    UnknownChat(String),

    #[error("[QA Client] chat {0} has no messages")]
    EmptyChat(String),
}

/* ------------------------------------------------------------------------- */
/* Config errors                                                             */
/* ------------------------------------------------------------------------- */

/// Error enum for environment/config-driven setup.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing or empty.
    #[error("[QA Client] missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// A number failed to parse (timeouts, limits).
    #[error("[QA Client] invalid number in {var}: {reason}")]
    InvalidNumber {
        var: &'static str,
        reason: &'static str,
    },

    /// Value had the wrong format (e.g., invalid URL or header value).
    #[error("[QA Client] invalid format in {var}: {reason}")]
    InvalidFormat {
        var: &'static str,
        reason: &'static str,
    },

    /// The HTTP client could not be constructed.
    #[error("[QA Client] failed to build HTTP client: {0}")]
    HttpClient(String),
}

/* ------------------------------------------------------------------------- */
/* Taxonomy                                                                  */
/* ------------------------------------------------------------------------- */

/// Classification of a failed turn. Drives retryability and the user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimitExceeded,
    ServiceUnavailable,
    /// Connection timeout, inactivity timeout, or backend-side generation timeout.
    LlmTimeout,
    NetworkError,
    ValidationError,
    RetrievalFailed,
    /// A backing store (graph DB, search index, vector DB, cache) is down.
    ServiceDependencyUnavailable,
    /// The caller aborted the turn through its abort handle.
    Cancelled,
    UnknownError,
}

impl ErrorKind {
    /// Wire/log code of the kind.
    pub fn as_code(&self) -> &'static str {
        match self {
            ErrorKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorKind::LlmTimeout => "LLM_TIMEOUT",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::RetrievalFailed => "RETRIEVAL_FAILED",
            ErrorKind::ServiceDependencyUnavailable => "SERVICE_DEPENDENCY_UNAVAILABLE",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Maps a backend error code. Store-specific "unavailable" codes collapse
    /// into [`ErrorKind::ServiceDependencyUnavailable`].
    pub fn from_code(code: &str) -> Option<Self> {
        let kind = match code {
            "RATE_LIMIT_EXCEEDED" => ErrorKind::RateLimitExceeded,
            "SERVICE_UNAVAILABLE" => ErrorKind::ServiceUnavailable,
            "LLM_TIMEOUT" => ErrorKind::LlmTimeout,
            "NETWORK_ERROR" => ErrorKind::NetworkError,
            "VALIDATION_ERROR" => ErrorKind::ValidationError,
            "RETRIEVAL_FAILED" => ErrorKind::RetrievalFailed,
            "SERVICE_DEPENDENCY_UNAVAILABLE"
            | "NEO4J_UNAVAILABLE"
            | "OPENSEARCH_UNAVAILABLE"
            | "QDRANT_UNAVAILABLE"
            | "REDIS_UNAVAILABLE" => ErrorKind::ServiceDependencyUnavailable,
            "UNKNOWN_ERROR" => ErrorKind::UnknownError,
            _ => return None,
        };
        Some(kind)
    }

    /// Status-only classification used when the body names no known code.
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            429 => ErrorKind::RateLimitExceeded,
            502 | 503 => ErrorKind::ServiceUnavailable,
            504 => ErrorKind::LlmTimeout,
            400 | 422 => ErrorKind::ValidationError,
            _ => ErrorKind::UnknownError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimitExceeded
                | ErrorKind::ServiceUnavailable
                | ErrorKind::LlmTimeout
                | ErrorKind::NetworkError
                | ErrorKind::Cancelled
        )
    }

    /// Default message shown to the end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::RateLimitExceeded => "You have sent too many requests. Please wait a moment.",
            ErrorKind::ServiceUnavailable => "The service is temporarily unavailable.",
            ErrorKind::LlmTimeout => "Generating the answer took too long.",
            ErrorKind::NetworkError => {
                "Cannot reach the server. Please check your network connection."
            }
            ErrorKind::ValidationError => "Invalid input. Please check your question.",
            ErrorKind::RetrievalFailed => "The document search failed.",
            ErrorKind::ServiceDependencyUnavailable => "Process data is currently unavailable.",
            ErrorKind::Cancelled => "The request was cancelled.",
            ErrorKind::UnknownError => "An unexpected error occurred.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

/* ------------------------------------------------------------------------- */
/* Normalized API error                                                      */
/* ------------------------------------------------------------------------- */

/// Normalized failure of a backend call.
#[derive(Debug, Clone, Error)]
#[error("[QA Client] {kind}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    /// Technical message (logs, diagnostics).
    pub message: String,
    /// Message suitable for the end user.
    pub user_message: String,
    pub retryable: bool,
    /// Seconds to wait before retrying (rate limiting).
    pub retry_after: Option<u64>,
    /// Backend correlation id, if the backend sent one.
    pub request_id: Option<String>,
    pub details: Option<Value>,
}

impl ApiError {
    /// Error of `kind` with the kind's default user message and retryability.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            user_message: kind.user_message().to_string(),
            retryable: kind.is_retryable(),
            retry_after: None,
            request_id: None,
            details: None,
        }
    }

    pub fn with_user_message(mut self, user_message: impl Into<String>) -> Self {
        self.user_message = user_message.into();
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Connection or inactivity timeout detected on the client side.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LlmTimeout, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "request aborted by caller")
    }

    /// Normalizes a non-2xx response.
    ///
    /// The body is expected as `{"error": {"code", "message", "details", "request_id"}}`;
    /// anything else falls back to a status-only classification.
    pub fn from_response(status: StatusCode, headers: &HeaderMap, body: &str) -> Self {
        let envelope = serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .and_then(|e| e.error);

        let code = envelope.as_ref().and_then(|e| e.code.as_deref());
        let kind = if status == StatusCode::TOO_MANY_REQUESTS {
            ErrorKind::RateLimitExceeded
        } else {
            code.and_then(ErrorKind::from_code)
                .unwrap_or_else(|| ErrorKind::from_status(status))
        };

        let backend_message = envelope
            .as_ref()
            .and_then(|e| e.message.clone())
            .filter(|m| !m.trim().is_empty());
        let details = envelope.as_ref().and_then(|e| e.details.clone());

        let message = backend_message.clone().unwrap_or_else(|| {
            if status.is_server_error() {
                format!("Server error {}", status.as_u16())
            } else {
                format!("Client error {}", status.as_u16())
            }
        });

        let mut err = ApiError::new(kind, message);
        err.details = details.filter(|d| !d.is_null());
        err.request_id = envelope
            .as_ref()
            .and_then(|e| e.request_id.clone())
            .or_else(|| header_str(headers, "x-request-id"));

        match kind {
            ErrorKind::RateLimitExceeded => {
                err.retry_after = err
                    .details
                    .as_ref()
                    .and_then(|d| d.get("retry_after"))
                    .and_then(Value::as_u64)
                    .or_else(|| {
                        header_str(headers, RETRY_AFTER.as_str()).and_then(|v| v.parse().ok())
                    });
                if let Some(secs) = err.retry_after {
                    err.user_message =
                        format!("Too many requests. Please wait {secs} seconds.");
                }
            }
            ErrorKind::ValidationError => {
                if let Some(m) = backend_message {
                    err.user_message = m;
                }
            }
            _ => {}
        }

        err
    }

    /// Normalizes a transport-level failure (no HTTP status available).
    pub fn from_transport(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            return ApiError::timeout(format!("transport timeout: {e}"));
        }
        if e.is_connect() || e.is_request() || e.is_body() {
            return ApiError::network(format!("transport error: {e}"));
        }
        if e.is_decode() {
            return ApiError::new(ErrorKind::UnknownError, format!("decode error: {e}"));
        }
        ApiError::new(ErrorKind::UnknownError, format!("unexpected transport error: {e}"))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<Value>,
    request_id: Option<String>,
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Trims a response body to a short single-line snippet for logs.
pub fn make_snippet(text: &str) -> String {
    text.chars()
        .take(240)
        .collect::<String>()
        .replace(['\n', '\r'], " ")
}

/* ------------------------------------------------------------------------- */
/* Env helpers                                                               */
/* ------------------------------------------------------------------------- */

/// Reads an optional, non-empty environment variable.
pub fn env_opt(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parses an optional `u64` from env (`Ok(None)` if unset/empty).
///
/// # Errors
/// Returns [`ConfigError::InvalidNumber`] if the variable is set but not a valid `u64`.
pub fn env_opt_u64(name: &'static str) -> std::result::Result<Option<u64>, ConfigError> {
    match env_opt(name) {
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber {
                var: name,
                reason: "expected u64",
            }),
        None => Ok(None),
    }
}

/// Parses an optional boolean (`true/false/1/0`) from env.
///
/// # Errors
/// Returns [`ConfigError::InvalidFormat`] for any other value.
pub fn env_opt_bool(name: &'static str) -> std::result::Result<Option<bool>, ConfigError> {
    match env_opt(name).as_deref().map(str::trim) {
        Some("true") | Some("1") => Ok(Some(true)),
        Some("false") | Some("0") => Ok(Some(false)),
        Some(_) => Err(ConfigError::InvalidFormat {
            var: name,
            reason: "expected true/false",
        }),
        None => Ok(None),
    }
}

/// Validates that an HTTP endpoint starts with `http://` or `https://`.
///
/// # Errors
/// Returns [`ConfigError::InvalidFormat`] when the scheme is missing.
pub fn validate_http_endpoint(
    var: &'static str,
    value: &str,
) -> std::result::Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidFormat {
            var,
            reason: "must start with http:// or https://",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn classify(status: u16, body: &str) -> ApiError {
        ApiError::from_response(
            StatusCode::from_u16(status).unwrap(),
            &HeaderMap::new(),
            body,
        )
    }

    #[test]
    fn retryable_kinds_match_taxonomy() {
        use ErrorKind::*;
        for (kind, retryable) in [
            (RateLimitExceeded, true),
            (ServiceUnavailable, true),
            (LlmTimeout, true),
            (NetworkError, true),
            (ValidationError, false),
            (RetrievalFailed, false),
            (ServiceDependencyUnavailable, false),
            (UnknownError, false),
        ] {
            assert_eq!(kind.is_retryable(), retryable, "{kind}");
        }
    }

    #[test]
    fn rate_limit_reads_retry_after_from_details() {
        let err = classify(
            429,
            r#"{"error":{"code":"RATE_LIMIT_EXCEEDED","message":"slow down","details":{"retry_after":30},"request_id":"req-1"}}"#,
        );
        assert_eq!(err.kind, ErrorKind::RateLimitExceeded);
        assert!(err.retryable);
        assert_eq!(err.retry_after, Some(30));
        assert_eq!(err.request_id.as_deref(), Some("req-1"));
        assert!(err.user_message.contains("30"));
    }

    #[test]
    fn rate_limit_falls_back_to_header() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        let err = ApiError::from_response(StatusCode::TOO_MANY_REQUESTS, &headers, "not json");
        assert_eq!(err.retry_after, Some(12));
        assert_eq!(err.request_id.as_deref(), Some("abc"));
    }

    #[test]
    fn body_code_wins_over_status() {
        let err = classify(
            500,
            r#"{"error":{"code":"NEO4J_UNAVAILABLE","message":"graph down","details":{}}}"#,
        );
        assert_eq!(err.kind, ErrorKind::ServiceDependencyUnavailable);
        assert!(!err.retryable);

        let err = classify(500, r#"{"error":{"code":"RETRIEVAL_FAILED","message":"x"}}"#);
        assert_eq!(err.kind, ErrorKind::RetrievalFailed);
        assert!(!err.retryable);
    }

    #[test]
    fn status_classification_without_body() {
        assert_eq!(classify(503, "").kind, ErrorKind::ServiceUnavailable);
        assert_eq!(classify(502, "").kind, ErrorKind::ServiceUnavailable);
        assert_eq!(classify(504, "").kind, ErrorKind::LlmTimeout);
        assert_eq!(classify(500, "").kind, ErrorKind::UnknownError);
        assert_eq!(classify(404, "").kind, ErrorKind::UnknownError);
        assert!(classify(504, "").retryable);
        assert!(!classify(500, "").retryable);
        assert_eq!(classify(500, "").message, "Server error 500");
    }

    #[test]
    fn validation_surfaces_backend_message() {
        let err = classify(
            422,
            r#"{"error":{"code":"VALIDATION_ERROR","message":"query must not be empty"}}"#,
        );
        assert_eq!(err.kind, ErrorKind::ValidationError);
        assert_eq!(err.user_message, "query must not be empty");
        assert!(!err.retryable);
    }

    #[test]
    fn unknown_body_code_uses_status() {
        let err = classify(503, r#"{"error":{"code":"SOMETHING_NEW","message":"m"}}"#);
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
        assert_eq!(err.message, "m");
    }

    #[test]
    fn endpoint_validation() {
        assert!(validate_http_endpoint("QA_API_URL", "http://localhost:8000").is_ok());
        assert!(validate_http_endpoint("QA_API_URL", "localhost:8000").is_err());
    }

    #[test]
    fn snippet_is_single_line_and_bounded() {
        let s = make_snippet(&"a\nb".repeat(200));
        assert!(!s.contains('\n'));
        assert_eq!(s.chars().count(), 240);
    }
}
