//! HTTP client module with retry logic, credentials and response caching.

mod cache;
mod client;
mod retry;

pub use cache::ResponseCache;
pub use client::{Auth, HttpClient};
pub use retry::{
    MAX_RETRIES, NonRetryableError, RETRY_DELAY_MS, check_response, classify_status,
    is_not_found, is_rate_limited, is_retryable,
};
