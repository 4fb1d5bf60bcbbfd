//! HTTP client with credentials, conditional-request caching and retries.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::cache::ResponseCache;
use super::retry::{MAX_RETRIES, RETRY_DELAY_MS, check_response, is_retryable};

/// How requests authenticate against the API.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Auth {
    #[default]
    Anonymous,
    /// Personal access token, sent as a bearer token.
    Token(String),
    /// Basic credentials: an OAuth app's id/secret or a login/password pair.
    Basic { username: String, password: String },
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::Anonymous => write!(f, "Anonymous"),
            Auth::Token(_) => write!(f, "Token(***)"),
            Auth::Basic { username, .. } => write!(f, "Basic({}:***)", username),
        }
    }
}

/// HTTP client shared by every API call. Clones share the response cache.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    auth: Auth,
    cache: Option<Arc<ResponseCache>>,
}

impl HttpClient {
    /// Wraps a reqwest Client with anonymous access and no response cache.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            auth: Auth::Anonymous,
            cache: None,
        }
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    /// Answers repeated GETs of unchanged resources from `cache`.
    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::Anonymous => request,
            Auth::Token(token) => request.bearer_auth(token),
            Auth::Basic { username, password } => request.basic_auth(username, Some(password)),
        }
    }

    /// Performs a GET request and deserializes the JSON response.
    #[tracing::instrument(skip(self))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.get_json_with_query(url, &[]).await
    }

    /// Performs a GET request with query parameters and deserializes the JSON
    /// response. Uses a conditional request when the response cache holds an
    /// ETag for the same URL and query.
    #[tracing::instrument(skip(self, query))]
    pub async fn get_json_with_query<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        debug!("GET JSON from {} with query {:?}...", url, query);

        let key = ResponseCache::key(url, query);

        let body = self
            .with_retry("GET JSON", || async {
                let mut request = self.authorize(self.client.get(url).query(query));
                let cached_etag = self.cache.as_ref().and_then(|c| c.etag(&key));
                if let Some(etag) = &cached_etag {
                    request = request.header(IF_NONE_MATCH, etag);
                }

                let response = request.send().await.context("Failed to send request")?;
                let response = check_response(response)?;

                if response.status() == StatusCode::NOT_MODIFIED {
                    if let Some(body) = self.cache.as_ref().and_then(|c| c.body(&key)) {
                        debug!("{} not modified, using cached response", url);
                        return Ok(body);
                    }
                    anyhow::bail!("Received 304 Not Modified for {} without a cached body", url);
                }

                let etag = response
                    .headers()
                    .get(ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);

                let body = response
                    .text()
                    .await
                    .context("Failed to read response body")?;

                if let (Some(cache), Some(etag)) = (&self.cache, etag) {
                    cache.store(&key, &etag, &body);
                }

                Ok(body)
            })
            .await?;

        serde_json::from_str(&body).context("Failed to parse JSON response")
    }

    /// Performs a POST request with a JSON body and deserializes the JSON
    /// response. Never cached.
    #[tracing::instrument(skip(self, body))]
    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        debug!("POST JSON to {}...", url);

        self.with_retry("POST JSON", || async {
            let response = self
                .authorize(self.client.post(url).json(body))
                .send()
                .await
                .context("Failed to send request")?;

            let response = check_response(response)?;

            let result = response
                .json::<T>()
                .await
                .context("Failed to parse JSON response")?;

            Ok(result)
        })
        .await
    }

    /// Executes an async operation, retrying transient failures.
    async fn with_retry<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !is_retryable(&e) {
                        debug!("{}: non-retryable error: {}", operation_name, e);
                        return Err(e);
                    }

                    if attempt < MAX_RETRIES {
                        warn!(
                            "{}: attempt {}/{} failed ({}), retrying in {}ms...",
                            operation_name, attempt, MAX_RETRIES, e, RETRY_DELAY_MS
                        );
                        tokio::time::sleep(std::time::Duration::from_millis(RETRY_DELAY_MS)).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("{}: failed after {} attempts", operation_name, MAX_RETRIES)
        }))
    }
}
