//! ETag-keyed response cache used for conditional GET requests.
//!
//! GitHub does not count `304 Not Modified` answers against the rate limit, so
//! replaying a cached body for an unchanged resource saves request budget.

use dashmap::DashMap;

#[derive(Debug, Clone, PartialEq)]
struct CachedResponse {
    etag: String,
    body: String,
}

/// In-memory response cache shared by every clone of an `HttpClient`.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: DashMap<String, CachedResponse>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// ETag to send as `If-None-Match` for this request key.
    pub fn etag(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|e| e.etag.clone())
    }

    /// Body previously stored for this request key.
    pub fn body(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|e| e.body.clone())
    }

    pub fn store(&self, key: &str, etag: &str, body: &str) {
        self.entries.insert(
            key.to_string(),
            CachedResponse {
                etag: etag.to_string(),
                body: body.to_string(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cache key for a GET request: the URL plus its query pairs in order.
    pub fn key(url: &str, query: &[(&str, &str)]) -> String {
        if query.is_empty() {
            return url.to_string();
        }
        let pairs: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("{}?{}", url, pairs.join("&"))
    }
}
