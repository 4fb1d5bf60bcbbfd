//! Retry policy and error classification for GitHub API calls.

use reqwest::StatusCode;
use reqwest::header::HeaderMap;

/// Maximum number of attempts for a single API call.
pub const MAX_RETRIES: usize = 3;

/// Delay between attempts in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1000;

/// Header GitHub uses to report the remaining request budget.
pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Errors that will not go away by asking again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NonRetryableError {
    /// Request budget exhausted (HTTP 403 with an empty budget, or 429)
    RateLimitExceeded(String),
    /// HTTP 401
    AuthenticationFailed(String),
    /// HTTP 404, or a GraphQL `NOT_FOUND` error
    NotFound(String),
    /// HTTP 403 with budget left
    Forbidden(String),
    /// Any other 4xx
    ClientError(String),
}

impl std::fmt::Display for NonRetryableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NonRetryableError::RateLimitExceeded(msg) => write!(
                f,
                "Rate limit exceeded: {}. Try again later or configure an access token.",
                msg
            ),
            NonRetryableError::AuthenticationFailed(msg) => {
                write!(f, "Authentication failed: {}. Check your credentials.", msg)
            }
            NonRetryableError::NotFound(msg) => write!(f, "Not found: {}", msg),
            NonRetryableError::Forbidden(msg) => {
                write!(f, "Access forbidden: {}. You may need authentication.", msg)
            }
            NonRetryableError::ClientError(msg) => write!(f, "Request error: {}", msg),
        }
    }
}

impl std::error::Error for NonRetryableError {}

/// Classifies a failed status. `None` means the failure is worth retrying.
pub fn classify_status(status: StatusCode, headers: &HeaderMap) -> Option<NonRetryableError> {
    let budget_exhausted = headers
        .get(RATE_LIMIT_REMAINING_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");

    match status {
        StatusCode::UNAUTHORIZED => Some(NonRetryableError::AuthenticationFailed(
            "Invalid or missing authentication token".to_string(),
        )),
        StatusCode::FORBIDDEN if budget_exhausted => Some(NonRetryableError::RateLimitExceeded(
            "GitHub API rate limit exceeded".to_string(),
        )),
        StatusCode::FORBIDDEN => Some(NonRetryableError::Forbidden(
            "Access to this resource is forbidden".to_string(),
        )),
        StatusCode::TOO_MANY_REQUESTS => Some(NonRetryableError::RateLimitExceeded(
            "Too many requests".to_string(),
        )),
        StatusCode::NOT_FOUND => Some(NonRetryableError::NotFound(
            "The requested resource was not found".to_string(),
        )),
        s if s.is_client_error() => Some(NonRetryableError::ClientError(format!(
            "HTTP {} error",
            s.as_u16()
        ))),
        // 5xx
        _ => None,
    }
}

/// Turns a non-success response into an error, tagging it non-retryable where
/// another attempt cannot help.
pub fn check_response(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() || status == StatusCode::NOT_MODIFIED {
        return Ok(response);
    }

    match classify_status(status, response.headers()) {
        Some(non_retryable) => Err(anyhow::Error::from(non_retryable)),
        None => Err(anyhow::anyhow!("GitHub API returned HTTP {}", status.as_u16())),
    }
}

/// Whether an error chain carries a non-retryable classification.
pub fn is_retryable(e: &anyhow::Error) -> bool {
    e.downcast_ref::<NonRetryableError>().is_none()
}

/// Whether an error chain means the requested entity does not exist upstream.
pub fn is_not_found(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<NonRetryableError>(),
        Some(NonRetryableError::NotFound(_))
    )
}

/// Whether an error chain means the request budget is exhausted.
pub fn is_rate_limited(e: &anyhow::Error) -> bool {
    matches!(
        e.downcast_ref::<NonRetryableError>(),
        Some(NonRetryableError::RateLimitExceeded(_))
    )
}
