use serde::Serialize;
use thiserror::Error;

/// Every failure the service can surface, with its wire code, HTTP status
/// and retryable bit. Cloneable so a single-flight outcome can be handed
/// to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SiftError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("address blocked: {0}")]
    SsrfBlocked(String),

    #[error("robots.txt disallows {0}")]
    RobotsBlocked(String),

    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("{0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("fetch timed out after {0}s")]
    FetchTimeout(u64),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("upstream returned HTTP {0}")]
    UpstreamHttp(u16),

    #[error("render failed: {0}")]
    Render(String),

    #[error("LLM call timed out after {0}s")]
    LlmTimeout(u64),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("LLM output invalid: {0}")]
    LlmOutputInvalid(String),

    #[error("job queue is full")]
    QueueFull,

    #[error("worker stalled and the job could not be reclaimed")]
    WorkerStalled,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SiftError {
    /// Wrap any storage-layer failure. Keeps sqlx out of this crate.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        SiftError::Storage(err.to_string())
    }

    /// The stable wire code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            SiftError::InvalidUrl(_) => "INVALID_URL",
            SiftError::UnsupportedScheme(_) => "UNSUPPORTED_SCHEME",
            SiftError::SsrfBlocked(_) => "SSRF_BLOCKED",
            SiftError::RobotsBlocked(_) => "ROBOTS_BLOCKED",
            SiftError::RateLimited { .. } => "RATE_LIMITED",
            SiftError::Validation(_) => "VALIDATION_ERROR",
            SiftError::Unauthorized(_) => "UNAUTHORIZED",
            SiftError::Forbidden(_) => "FORBIDDEN",
            SiftError::FetchTimeout(_) => "FETCH_TIMEOUT",
            SiftError::Fetch(_) => "FETCH_ERROR",
            SiftError::UpstreamHttp(_) => "UPSTREAM_HTTP_ERROR",
            SiftError::Render(_) => "RENDER_ERROR",
            SiftError::LlmTimeout(_) => "LLM_TIMEOUT",
            SiftError::LlmProvider(_) => "LLM_PROVIDER_ERROR",
            SiftError::LlmOutputInvalid(_) => "LLM_OUTPUT_INVALID",
            SiftError::QueueFull => "QUEUE_FULL",
            SiftError::WorkerStalled => "WORKER_STALLED",
            SiftError::NotFound(_) => "NOT_FOUND",
            SiftError::Conflict(_) => "CONFLICT",
            SiftError::Storage(_) | SiftError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status a transport layer should map this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            SiftError::InvalidUrl(_) | SiftError::UnsupportedScheme(_) | SiftError::Validation(_) => 422,
            SiftError::Unauthorized(_) => 401,
            SiftError::Forbidden(_) | SiftError::SsrfBlocked(_) | SiftError::RobotsBlocked(_) => 403,
            SiftError::NotFound(_) => 404,
            SiftError::Conflict(_) => 409,
            SiftError::RateLimited { .. } => 429,
            SiftError::FetchTimeout(_) | SiftError::LlmTimeout(_) => 504,
            SiftError::Fetch(_)
            | SiftError::UpstreamHttp(_)
            | SiftError::Render(_)
            | SiftError::LlmProvider(_)
            | SiftError::LlmOutputInvalid(_) => 502,
            SiftError::QueueFull => 503,
            SiftError::WorkerStalled | SiftError::Storage(_) | SiftError::Internal(_) => 500,
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            SiftError::RateLimited { .. }
                | SiftError::FetchTimeout(_)
                | SiftError::Fetch(_)
                | SiftError::Render(_)
                | SiftError::LlmTimeout(_)
                | SiftError::LlmProvider(_)
                | SiftError::QueueFull
                | SiftError::Storage(_)
        )
    }

    /// Retry-after hint in seconds, when the error carries one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            SiftError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

/// JSON error envelope handed to the transport layer.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorEnvelope {
    pub fn new(err: &SiftError, request_id: Option<String>) -> Self {
        let details = err
            .retry_after_secs()
            .map(|s| serde_json::json!({ "retry_after_seconds": s }));
        Self {
            error: ErrorBody {
                code: err.code(),
                message: err.to_string(),
                request_id,
                details,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_expected_statuses() {
        let cases: Vec<(SiftError, &str, u16)> = vec![
            (SiftError::SsrfBlocked("127.0.0.1".into()), "SSRF_BLOCKED", 403),
            (SiftError::RobotsBlocked("/private".into()), "ROBOTS_BLOCKED", 403),
            (SiftError::RateLimited { retry_after_secs: 12 }, "RATE_LIMITED", 429),
            (SiftError::Validation("max_depth".into()), "VALIDATION_ERROR", 422),
            (SiftError::FetchTimeout(20), "FETCH_TIMEOUT", 504),
            (SiftError::UpstreamHttp(404), "UPSTREAM_HTTP_ERROR", 502),
            (SiftError::QueueFull, "QUEUE_FULL", 503),
            (SiftError::WorkerStalled, "WORKER_STALLED", 500),
            (SiftError::LlmOutputInvalid("schema".into()), "LLM_OUTPUT_INVALID", 502),
        ];
        for (err, code, status) in cases {
            assert_eq!(err.code(), code);
            assert_eq!(err.http_status(), status);
        }
    }

    #[test]
    fn rate_limited_envelope_carries_retry_hint() {
        let err = SiftError::RateLimited { retry_after_secs: 7 };
        assert!(err.retryable());
        let env = ErrorEnvelope::new(&err, Some("req-1".into()));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["error"]["code"], "RATE_LIMITED");
        assert_eq!(json["error"]["details"]["retry_after_seconds"], 7);
    }

    #[test]
    fn upstream_4xx_is_not_retryable() {
        assert!(!SiftError::UpstreamHttp(404).retryable());
        assert!(SiftError::Fetch("connection reset".into()).retryable());
    }
}
