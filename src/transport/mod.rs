pub mod executor;
pub mod http;
pub mod retry;

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FetchError;

pub use executor::{RequestExecutor, RequestIdMiddleware, RequestMiddleware};
pub use http::ReqwestTransport;
pub use retry::{RetryContext, RetryPolicy, RETRYABLE_STATUSES};

/// Request parameters. Kept sorted so serialization is canonical regardless
/// of insertion order.
pub type Params = BTreeMap<String, Value>;

/// Identity of one logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    method: Method,
    url: String,
    params: Params,
}

#[derive(Serialize)]
struct CanonicalKey<'a> {
    method: &'a str,
    url: &'a str,
    params: &'a Params,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: Params::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Returns a new descriptor carrying `params`; `self` is left untouched.
    pub fn with_params(&self, params: Params) -> Self {
        Self {
            method: self.method.clone(),
            url: self.url.clone(),
            params,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Parameters flattened to query-string pairs. Strings go through as-is,
    /// everything else uses its JSON text.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect()
    }

    /// Stable cache key. Nested objects are sorted too since `serde_json::Map`
    /// is ordered by key.
    pub fn cache_key(&self) -> String {
        let key = CanonicalKey {
            method: self.method.as_str(),
            url: &self.url,
            params: &self.params,
        };
        serde_json::to_string(&key)
            .unwrap_or_else(|_| format!("{} {} {:?}", self.method, self.url, self.params))
    }
}

/// Raw response handed back by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// The network seam. Implementations perform exactly one call and never
/// retry on their own.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        descriptor: &RequestDescriptor,
        headers: HeaderMap,
    ) -> Result<HttpResponse, FetchError>;
}
