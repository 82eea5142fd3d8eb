pub mod config;
pub mod controller;
pub mod state;

use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::ResponseCache;
use crate::error::FetchError;
use crate::security::interceptor::{AuthInterceptor, AuthRecovery};
use crate::security::session::AuthSession;
use crate::transport::{
    HttpResponse, RequestDescriptor, RequestExecutor, RequestIdMiddleware, ReqwestTransport,
    RetryContext, RetryPolicy, Transport,
};

pub use config::ClientConfig;
pub use controller::{FetchController, FetchOptions};
pub use state::{FetchPhase, FetchState};

/// Shared plumbing for every controller: the middleware chain, the response
/// cache and the default retry rule.
#[derive(Clone)]
pub struct FetchClient {
    executor: RequestExecutor,
    interceptor: Arc<AuthInterceptor>,
    cache: ResponseCache,
    retry: RetryPolicy,
    cache_enabled: bool,
}

impl FetchClient {
    /// Chain order is request id, then bearer token.
    pub fn new(transport: Arc<dyn Transport>, session: Arc<dyn AuthSession>) -> Self {
        let interceptor = Arc::new(AuthInterceptor::new(session));
        let executor = RequestExecutor::new(transport)
            .with_middleware(Arc::new(RequestIdMiddleware))
            .with_middleware(interceptor.clone());
        Self {
            executor,
            interceptor,
            cache: ResponseCache::in_memory(),
            retry: RetryPolicy::default(),
            cache_enabled: false,
        }
    }

    pub fn from_config(config: &ClientConfig, session: Arc<dyn AuthSession>) -> Result<Self> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        let cache = match config.cache_capacity {
            Some(capacity) => ResponseCache::bounded(capacity),
            None => ResponseCache::in_memory(),
        };
        Ok(Self::new(Arc::new(transport), session)
            .with_cache(cache)
            .with_cache_enabled(config.cache_enabled)
            .with_retry(config.retry_policy()))
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    /// New controller bound to a GET of `url`.
    pub fn controller<T>(&self, url: impl Into<String>, options: FetchOptions) -> FetchController<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        FetchController::new(self.clone(), RequestDescriptor::get(url), options)
    }

    /// One full fetch cycle for `descriptor`: cache lookup, network call,
    /// auth recovery, transient retry, decode and cache write.
    pub async fn run_cycle<T: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
        cache_enabled: bool,
        retry: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<T, FetchError> {
        if cache_enabled {
            if let Some(hit) = self.cache.get::<T>(descriptor) {
                debug!(url = %descriptor.url(), "serving response from cache");
                return Ok(hit);
            }
        }

        let response = self.send(descriptor, retry, cancel).await?;
        let data = serde_json::from_slice::<T>(&response.body)
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        if cache_enabled {
            match response.text() {
                Some(body) => self.cache.put(descriptor, body),
                None => warn!(url = %descriptor.url(), "response body is not UTF-8, not cached"),
            }
        }
        Ok(data)
    }

    /// Network stage. Auth recovery may reissue once per call without
    /// consuming a retry attempt; transient statuses then back off.
    async fn send(
        &self,
        descriptor: &RequestDescriptor,
        retry: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, FetchError> {
        let mut ctx = RetryContext::new();
        let mut auth_recovered = false;

        loop {
            let response = self.executor.execute(descriptor, cancel).await?;
            if response.is_success() {
                return Ok(response);
            }
            let status = response.status;
            ctx.record(status);

            if !auth_recovered {
                match self.interceptor.recover(descriptor, status, cancel).await {
                    AuthRecovery::Reissue => {
                        auth_recovered = true;
                        continue;
                    }
                    AuthRecovery::Redirected => return Err(FetchError::AuthRecoveryFailed),
                    AuthRecovery::Cancelled => return Err(FetchError::Cancelled),
                    AuthRecovery::NotApplicable => {}
                }
            }

            if retry.should_retry(ctx.attempt, status) {
                let delay = retry.delay_for(ctx.attempt);
                warn!(
                    url = %descriptor.url(),
                    status = status,
                    attempt = ctx.attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient server error, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(url = %descriptor.url(), "backoff aborted by cancellation");
                        return Err(FetchError::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                ctx.advance();
                continue;
            }

            if RetryPolicy::is_retryable_status(status) {
                return Err(FetchError::TransientServer {
                    status,
                    attempts: ctx.attempt,
                });
            }
            return Err(FetchError::Status { status });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::session::MemorySession;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use reqwest::header::HeaderMap;
    use std::collections::VecDeque;

    struct Scripted {
        responses: Mutex<VecDeque<HttpResponse>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(responses: Vec<HttpResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> usize {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(
            &self,
            _descriptor: &RequestDescriptor,
            _headers: HeaderMap,
        ) -> Result<HttpResponse, FetchError> {
            *self.calls.lock() += 1;
            Ok(self
                .responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| HttpResponse::new(500, "")))
        }
    }

    fn client(transport: Arc<Scripted>) -> FetchClient {
        FetchClient::new(transport, Arc::new(MemorySession::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_status_fails_immediately() {
        let transport = Scripted::new(vec![HttpResponse::new(404, "")]);
        let result = client(transport.clone())
            .run_cycle::<serde_json::Value>(
                &RequestDescriptor::get("http://api/x"),
                false,
                &RetryPolicy::new(5, 10),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result, Err(FetchError::Status { status: 404 }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let transport = Scripted::new(vec![
            HttpResponse::new(502, ""),
            HttpResponse::new(200, r#"{"ok":true}"#),
        ]);
        let value: serde_json::Value = client(transport.clone())
            .run_cycle(
                &RequestDescriptor::get("http://api/x"),
                false,
                &RetryPolicy::new(3, 10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts() {
        let transport = Scripted::new(vec![]);
        let err = client(transport.clone())
            .run_cycle::<serde_json::Value>(
                &RequestDescriptor::get("http://api/x"),
                false,
                &RetryPolicy::new(2, 10),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "request failed with status code 500 after 2 attempts"
        );
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_not_cached() {
        let transport = Scripted::new(vec![HttpResponse::new(200, "not json")]);
        let client = client(transport);
        let descriptor = RequestDescriptor::get("http://api/x");
        let err = client
            .run_cycle::<serde_json::Value>(
                &descriptor,
                true,
                &RetryPolicy::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
        assert!(client.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let transport = Scripted::new(vec![]);
        let client = client(transport.clone());
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            canceller.cancel();
        });
        let result = client
            .run_cycle::<serde_json::Value>(
                &RequestDescriptor::get("http://api/x"),
                false,
                &RetryPolicy::new(5, 1000),
                &cancel,
            )
            .await;
        assert_eq!(result, Err(FetchError::Cancelled));
        assert_eq!(transport.calls(), 1);
    }
}
