use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::FetchError;
use crate::transport::{HttpResponse, RequestDescriptor, Transport};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// One link of the outgoing request chain. Runs on every network attempt,
/// reissues included, so header values are always current.
#[async_trait]
pub trait RequestMiddleware: Send + Sync {
    async fn on_request(
        &self,
        descriptor: &RequestDescriptor,
        headers: &mut HeaderMap,
    ) -> Result<(), FetchError>;
}

/// Stamps each attempt with a fresh request id.
#[derive(Debug, Clone, Default)]
pub struct RequestIdMiddleware;

#[async_trait]
impl RequestMiddleware for RequestIdMiddleware {
    async fn on_request(
        &self,
        _descriptor: &RequestDescriptor,
        headers: &mut HeaderMap,
    ) -> Result<(), FetchError> {
        let id = Uuid::new_v4().to_string();
        let value =
            HeaderValue::from_str(&id).map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
        headers.insert(REQUEST_ID_HEADER, value);
        Ok(())
    }
}

/// Performs single network calls through the middleware chain, honoring the
/// cycle's cancellation token.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    middleware: Vec<Arc<dyn RequestMiddleware>>,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            middleware: Vec::new(),
        }
    }

    /// Appends a middleware; links run in the order they were added.
    pub fn with_middleware(mut self, middleware: Arc<dyn RequestMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub async fn execute(
        &self,
        descriptor: &RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let mut headers = HeaderMap::new();
        for link in &self.middleware {
            link.on_request(descriptor, &mut headers).await?;
        }

        trace!(
            method = %descriptor.method(),
            url = %descriptor.url(),
            headers = headers.len(),
            "dispatching request"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(url = %descriptor.url(), "request aborted by cancellation");
                Err(FetchError::Cancelled)
            }
            result = self.transport.send(descriptor, headers) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<HeaderMap>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Transport for Recording {
        async fn send(
            &self,
            _descriptor: &RequestDescriptor,
            headers: HeaderMap,
        ) -> Result<HttpResponse, FetchError> {
            self.seen.lock().push(headers);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(HttpResponse::new(200, "{}"))
        }
    }

    struct Tag(&'static str);

    #[async_trait]
    impl RequestMiddleware for Tag {
        async fn on_request(
            &self,
            _descriptor: &RequestDescriptor,
            headers: &mut HeaderMap,
        ) -> Result<(), FetchError> {
            headers.append("x-chain", HeaderValue::from_static(self.0));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_middleware_runs_in_order() {
        let transport = Arc::new(Recording::default());
        let executor = RequestExecutor::new(transport.clone())
            .with_middleware(Arc::new(Tag("first")))
            .with_middleware(Arc::new(Tag("second")))
            .with_middleware(Arc::new(RequestIdMiddleware));

        let response = executor
            .execute(&RequestDescriptor::get("http://x"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        let seen = transport.seen.lock();
        let chain: Vec<_> = seen[0].get_all("x-chain").iter().collect();
        assert_eq!(chain, vec!["first", "second"]);
        assert!(seen[0].contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn test_request_ids_are_fresh_per_attempt() {
        let transport = Arc::new(Recording::default());
        let executor =
            RequestExecutor::new(transport.clone()).with_middleware(Arc::new(RequestIdMiddleware));
        let token = CancellationToken::new();
        let descriptor = RequestDescriptor::get("http://x");

        executor.execute(&descriptor, &token).await.unwrap();
        executor.execute(&descriptor, &token).await.unwrap();

        let seen = transport.seen.lock();
        assert_ne!(seen[0][REQUEST_ID_HEADER], seen[1][REQUEST_ID_HEADER]);
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_network() {
        let transport = Arc::new(Recording::default());
        let executor = RequestExecutor::new(transport.clone());
        let token = CancellationToken::new();
        token.cancel();

        let err = executor
            .execute(&RequestDescriptor::get("http://x"), &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(transport.seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_call() {
        let transport = Arc::new(Recording {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let executor = RequestExecutor::new(transport);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = executor
            .execute(&RequestDescriptor::get("http://x"), &token)
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Cancelled);
    }
}
