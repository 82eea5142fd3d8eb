use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::state::FetchState;
use crate::client::FetchClient;
use crate::error::FetchError;
use crate::transport::{Params, RequestDescriptor, RetryPolicy};

/// Per-controller settings. Unset fields fall back to the client's.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub params: Params,
    pub cache_enabled: Option<bool>,
    pub retry: Option<RetryPolicy>,
    /// Fire one fetch with `params` as soon as the controller is built.
    pub auto_fetch: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            params: Params::new(),
            cache_enabled: None,
            retry: None,
            auto_fetch: true,
        }
    }
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for an explicit `trigger`/`fetch`.
    pub fn manual(mut self) -> Self {
        self.auto_fetch = false;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = Some(enabled);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

struct Cycle {
    id: u64,
    token: CancellationToken,
}

struct Inner<T> {
    client: FetchClient,
    base: RequestDescriptor,
    cache_enabled: bool,
    retry: RetryPolicy,
    params: Mutex<Params>,
    current: Mutex<Option<Cycle>>,
    next_id: AtomicU64,
    settled: AtomicBool,
    state: watch::Sender<FetchState<T>>,
}

impl<T> Inner<T> {
    /// Publishes the outcome if cycle `id` still owns the slot.
    fn finish(&self, id: u64, outcome: Result<T, FetchError>) {
        let mut current = self.current.lock();
        if !matches!(current.as_ref(), Some(cycle) if cycle.id == id) {
            debug!(cycle = id, "dropping result of superseded cycle");
            return;
        }

        let next = match outcome {
            Ok(data) => FetchState::success(data),
            Err(err) if err.is_cancelled() => {
                debug!(cycle = id, "cycle cancelled");
                return;
            }
            Err(FetchError::AuthRecoveryFailed) => {
                debug!(cycle = id, url = %self.base.url(), "login redirect requested, cycle ended");
                FetchState::idle()
            }
            Err(err) => {
                warn!(
                    cycle = id,
                    url = %self.base.url(),
                    status = ?err.status(),
                    error = %err,
                    "fetch failed"
                );
                FetchState::failed(err.to_string())
            }
        };

        *current = None;
        self.settled.store(true, Ordering::SeqCst);
        self.state.send_replace(next);
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(cycle) = self.current.get_mut().take() {
            cycle.token.cancel();
        }
    }
}

/// Owns the observable state of one endpoint and serializes its fetch
/// cycles: starting a cycle cancels the previous one, so only the most
/// recent call can publish. Dropping the last handle cancels whatever is in
/// flight.
pub struct FetchController<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for FetchController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> FetchController<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(client: FetchClient, base: RequestDescriptor, options: FetchOptions) -> Self {
        let cache_enabled = options.cache_enabled.unwrap_or_else(|| client.cache_enabled());
        let retry = options.retry.unwrap_or_else(|| client.retry_policy());
        let (state, _) = watch::channel(FetchState::idle());
        let controller = Self {
            inner: Arc::new(Inner {
                client,
                base,
                cache_enabled,
                retry,
                params: Mutex::new(options.params),
                current: Mutex::new(None),
                next_id: AtomicU64::new(0),
                settled: AtomicBool::new(false),
                state,
            }),
        };

        if options.auto_fetch {
            match Handle::try_current() {
                Ok(handle) => {
                    controller.spawn_cycle(&handle, Params::new());
                }
                Err(_) => debug!(url = %controller.inner.base.url(), "no runtime, auto-fetch skipped"),
            }
        }
        controller
    }

    /// Starts a cycle in the background. Merging, superseding and the
    /// Loading transition have all happened by the time this returns; the
    /// handle resolves once the cycle settles or is cancelled.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime. [`Self::fetch`] runs the
    /// cycle on the calling task instead.
    pub fn trigger(&self, overrides: Params) -> JoinHandle<()> {
        self.spawn_cycle(&Handle::current(), overrides)
    }

    /// Runs a cycle on the calling task and returns the state left behind.
    /// Dropping the future cancels the cycle.
    pub async fn fetch(&self, overrides: Params) -> FetchState<T> {
        let (id, token, descriptor) = self.begin(overrides);
        let guard = token.clone().drop_guard();
        let outcome = self
            .inner
            .client
            .run_cycle::<T>(&descriptor, self.inner.cache_enabled, &self.inner.retry, &token)
            .await;
        guard.disarm();
        self.inner.finish(id, outcome);
        self.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> FetchState<T> {
        self.inner.state.borrow().clone()
    }

    /// Parameters retained across calls.
    pub fn params(&self) -> Params {
        self.inner.params.lock().clone()
    }

    fn spawn_cycle(&self, handle: &Handle, overrides: Params) -> JoinHandle<()> {
        let (id, token, descriptor) = self.begin(overrides);
        let client = self.inner.client.clone();
        let cache_enabled = self.inner.cache_enabled;
        let retry = self.inner.retry;
        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);

        handle.spawn(async move {
            let outcome = client
                .run_cycle::<T>(&descriptor, cache_enabled, &retry, &token)
                .await;
            match weak.upgrade() {
                Some(inner) => inner.finish(id, outcome),
                None => debug!(cycle = id, "controller dropped before cycle settled"),
            }
        })
    }

    /// Synchronous half of a cycle: merge params, cancel the predecessor,
    /// claim the slot and publish Loading.
    fn begin(&self, overrides: Params) -> (u64, CancellationToken, RequestDescriptor) {
        let mut current = self.inner.current.lock();

        let params = {
            let mut params = self.inner.params.lock();
            params.extend(overrides);
            params.clone()
        };

        if let Some(previous) = current.take() {
            previous.token.cancel();
            debug!(cycle = previous.id, "superseded in-flight cycle");
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        *current = Some(Cycle {
            id,
            token: token.clone(),
        });

        let initial = !self.inner.settled.load(Ordering::SeqCst);
        self.inner.state.send_replace(FetchState::loading(initial));

        (id, token, self.inner.base.with_params(params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::session::MemorySession;
    use crate::transport::{HttpResponse, Transport};
    use async_trait::async_trait;
    use reqwest::header::HeaderMap;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Transport for Echo {
        async fn send(
            &self,
            descriptor: &RequestDescriptor,
            _headers: HeaderMap,
        ) -> Result<HttpResponse, FetchError> {
            let body = serde_json::to_vec(descriptor.params()).unwrap_or_default();
            Ok(HttpResponse::new(200, body))
        }
    }

    fn controller(options: FetchOptions) -> FetchController<Value> {
        FetchClient::new(Arc::new(Echo), Arc::new(MemorySession::new()))
            .controller("http://api/echo", options)
    }

    #[test]
    fn test_default_options_auto_fetch() {
        let options = FetchOptions::default();
        assert!(options.auto_fetch);
        assert!(!options.manual().auto_fetch);
    }

    #[test]
    fn test_no_runtime_skips_auto_fetch() {
        let controller = controller(FetchOptions::new());
        assert_eq!(controller.state(), FetchState::idle());
    }

    #[test]
    #[should_panic]
    fn test_trigger_requires_runtime() {
        let controller = controller(FetchOptions::new().manual());
        let _ = controller.trigger(Params::new());
    }

    #[tokio::test]
    async fn test_auto_fetch_runs_once() {
        let controller = controller(FetchOptions::new().param("page", 1));
        let mut rx = controller.subscribe();
        let state = rx.wait_for(|s| s.data.is_some()).await.unwrap().clone();
        assert_eq!(state.data, Some(json!({"page": 1})));
    }

    #[tokio::test]
    async fn test_overrides_merge_into_retained_params() {
        let controller = controller(FetchOptions::new().manual().param("a", 1).param("b", 2));
        let state = controller
            .fetch(Params::from([("b".to_string(), json!(3))]))
            .await;
        assert_eq!(state.data, Some(json!({"a": 1, "b": 3})));
        assert_eq!(controller.params(), Params::from([
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!(3)),
        ]));
    }

    #[tokio::test]
    async fn test_trigger_publishes_loading_synchronously() {
        let controller = controller(FetchOptions::new().manual());
        let handle = controller.trigger(Params::new());
        let state = controller.state();
        assert!(state.loading && state.is_initial_loading);
        handle.await.unwrap();
        assert!(controller.state().data.is_some());

        let handle = controller.trigger(Params::new());
        let state = controller.state();
        assert!(state.loading && state.is_refreshing && !state.is_initial_loading);
        handle.await.unwrap();
    }
}
