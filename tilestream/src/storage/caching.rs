//! Network file source with request coalescing and a persistent cache.
//!
//! # Thread model
//!
//! The source is bound to one [`RunLoop`](crate::run_loop::RunLoop). The
//! pending registry and the cache store are only touched from that loop's
//! thread; network transfers run as futures on the loop's runtime and post
//! their completion back as loop jobs. Requests must be issued from the loop
//! thread, which is asserted.
//!
//! # Request flow
//!
//! 1. Resolve the locator against the base URL. `file://` and `asset://`
//!    locators go to an internal [`AssetSource`].
//! 2. A pending operation for the URL gets the new request as an extra
//!    listener: one transfer, many completions.
//! 3. A fresh cache record (or any record while offline) is delivered on the
//!    next loop iteration without registering anything.
//! 4. Otherwise a new operation is registered and its transfer started,
//!    conditional when a stale record carries validators. While offline the
//!    start is deferred until [`set_reachability(true)`](CachingHttpFileSource::set_reachability).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::asset::{AssetSource, ASSET_SCHEME, FILE_SCHEME};
use super::http::{HttpClient, HttpResponse, Validators};
use super::store::{CacheRecord, CacheStore, StoreStats};
use super::{
    Callback, FetchError, FileSource, Listener, Request, RequestState, ResourceKind, Response,
    ResponseSource,
};
use crate::run_loop::LoopHandle;

/// Query parameter carrying the access token.
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

/// One live network operation and everyone waiting on it.
struct Operation {
    id: u64,
    kind: ResourceKind,
    fetch_url: String,
    listeners: Vec<Listener>,
    /// Stale record being revalidated, if any.
    stale: Option<CacheRecord>,
    /// `None` while the start is deferred for reachability.
    transfer: Option<JoinHandle<()>>,
}

impl Operation {
    fn has_live_listeners(&self) -> bool {
        self.listeners.iter().any(|l| l.strong_count() > 0)
    }
}

/// Loop-thread-only state.
struct LoopState {
    registry: HashMap<String, Operation>,
    store: Box<dyn CacheStore>,
    next_operation: u64,
}

impl LoopState {
    fn lookup(&mut self, url: &str) -> Option<CacheRecord> {
        match self.store.get(url) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, url = %url, "Cache lookup failed");
                None
            }
        }
    }

    fn save(&mut self, record: CacheRecord) {
        let url = record.url.clone();
        if let Err(e) = self.store.put(record) {
            warn!(error = %e, url = %url, "Failed to write cache record");
        }
    }
}

#[derive(Debug, Default)]
struct SourceConfig {
    base: Option<Url>,
    access_token: String,
    asset_root: PathBuf,
}

struct Shared {
    client: Arc<dyn HttpClient>,
    config: Mutex<SourceConfig>,
    reachable: AtomicBool,
    run_loop: Mutex<Option<LoopHandle>>,
    state: Mutex<LoopState>,
}

impl Shared {
    fn bound_loop(&self) -> LoopHandle {
        match self.run_loop.lock().clone() {
            Some(run_loop) => run_loop,
            None => panic!("file source used without a bound loop"),
        }
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    fn start_transfer(
        self: &Arc<Self>,
        run_loop: &LoopHandle,
        url: String,
        operation: u64,
        fetch_url: String,
        validators: Option<Validators>,
    ) -> JoinHandle<()> {
        debug!(url = %url, operation, conditional = validators.is_some(), "Starting transfer");

        let shared: Weak<Self> = Arc::downgrade(self);
        let client = Arc::clone(&self.client);
        let completion_loop = run_loop.clone();

        run_loop.spawn(async move {
            let result = client.get(&fetch_url, validators.as_ref()).await;
            let posted = completion_loop.invoke(move || {
                if let Some(shared) = shared.upgrade() {
                    shared.complete(&url, operation, result);
                }
            });
            if posted.is_err() {
                trace!(operation, "Loop closed before transfer completion");
            }
        })
    }

    /// Finishes an operation on the loop thread: updates the cache, removes
    /// the registry entry, then fans the result out in attachment order.
    fn complete(&self, url: &str, operation: u64, result: Result<HttpResponse, FetchError>) {
        let (listeners, outcome) = {
            let mut state = self.state.lock();
            let current = state.registry.get(url).is_some_and(|op| op.id == operation);
            if !current {
                trace!(url = %url, operation, "Ignoring completion of retired operation");
                return;
            }
            let Some(op) = state.registry.remove(url) else {
                return;
            };

            let now = Utc::now();
            let outcome = match result {
                Ok(HttpResponse::Fresh { data, freshness }) => {
                    let record = CacheRecord::new(url, data, freshness, now);
                    let response = Response::from_record(&record, ResponseSource::Network);
                    state.save(record);
                    Ok(response)
                }
                Ok(HttpResponse::NotModified { freshness }) => match op.stale {
                    Some(mut record) => {
                        record.refresh(freshness, now);
                        let response = Response::from_record(&record, ResponseSource::Revalidated);
                        state.save(record);
                        Ok(response)
                    }
                    None => Err(FetchError::Status {
                        url: url.to_string(),
                        status: 304,
                    }),
                },
                Err(e) => Err(e),
            };
            (op.listeners, outcome)
        };

        match &outcome {
            Ok(response) => debug!(
                url = %url,
                bytes = response.data.len(),
                listeners = listeners.len(),
                "Transfer complete"
            ),
            Err(e) => debug!(url = %url, error = %e, listeners = listeners.len(), "Transfer failed"),
        }

        for listener in listeners {
            if let Some(request) = listener.upgrade() {
                request.deliver(outcome.clone());
            }
        }
    }

    /// Starts every deferred operation that still has a listener.
    fn resume_deferred(self: &Arc<Self>, run_loop: &LoopHandle) {
        if !self.is_reachable() {
            return;
        }

        let mut state = self.state.lock();
        state
            .registry
            .retain(|_, op| op.transfer.is_some() || op.has_live_listeners());

        let mut resumed = 0usize;
        for (url, op) in state.registry.iter_mut() {
            if op.transfer.is_none() {
                let validators = op.stale.as_ref().and_then(CacheRecord::validators);
                op.transfer = Some(self.start_transfer(
                    run_loop,
                    url.clone(),
                    op.id,
                    op.fetch_url.clone(),
                    validators,
                ));
                resumed += 1;
            }
        }
        if resumed > 0 {
            info!(resumed, "Network reachable, resuming deferred transfers");
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        for op in self.state.get_mut().registry.values() {
            if let Some(transfer) = &op.transfer {
                transfer.abort();
            }
        }
    }
}

/// HTTP file source with coalescing, caching and loop affinity.
///
/// Cloning yields another handle to the same source.
#[derive(Clone)]
pub struct CachingHttpFileSource {
    shared: Arc<Shared>,
}

impl CachingHttpFileSource {
    /// Creates an unbound, reachable source.
    pub fn new(store: Box<dyn CacheStore>, client: Arc<dyn HttpClient>) -> Self {
        Self {
            shared: Arc::new(Shared {
                client,
                config: Mutex::new(SourceConfig::default()),
                reachable: AtomicBool::new(true),
                run_loop: Mutex::new(None),
                state: Mutex::new(LoopState {
                    registry: HashMap::new(),
                    store,
                    next_operation: 1,
                }),
            }),
        }
    }

    /// Sets the base URL for relative locators. A trailing `/` is implied so
    /// relative paths append rather than replace the last segment.
    pub fn set_base(&self, base: &str) -> Result<(), url::ParseError> {
        let mut normalized = base.to_string();
        if !normalized.ends_with('/') {
            normalized.push('/');
        }
        let url = Url::parse(&normalized)?;
        self.shared.config.lock().base = Some(url);
        Ok(())
    }

    pub fn base(&self) -> Option<String> {
        self.shared.config.lock().base.as_ref().map(Url::to_string)
    }

    pub fn set_access_token(&self, token: impl Into<String>) {
        self.shared.config.lock().access_token = token.into();
    }

    pub fn access_token(&self) -> String {
        self.shared.config.lock().access_token.clone()
    }

    /// Directory serving `asset://` and relative `file://` locators.
    pub fn set_asset_root(&self, root: impl Into<PathBuf>) {
        self.shared.config.lock().asset_root = root.into();
    }

    pub fn is_reachable(&self) -> bool {
        self.shared.is_reachable()
    }

    /// Going offline defers new transfers; coming back online starts them.
    /// In-flight transfers are never aborted.
    pub fn set_reachability(&self, reachable: bool) {
        let was = self.shared.reachable.swap(reachable, Ordering::AcqRel);
        if was == reachable {
            return;
        }
        info!(reachable, "Reachability changed");

        if reachable {
            let Some(run_loop) = self.shared.run_loop.lock().clone() else {
                return;
            };
            let shared = Arc::downgrade(&self.shared);
            let resume_loop = run_loop.clone();
            let posted = run_loop.invoke(move || {
                if let Some(shared) = shared.upgrade() {
                    shared.resume_deferred(&resume_loop);
                }
            });
            if posted.is_err() {
                warn!("Loop closed, deferred transfers not resumed");
            }
        }
    }

    /// Binds the source to a loop. Rebinding to a different loop requires
    /// [`clear_loop`](Self::clear_loop) first.
    pub fn set_loop(&self, run_loop: LoopHandle) {
        let mut bound = self.shared.run_loop.lock();
        if let Some(current) = bound.as_ref() {
            assert_eq!(
                current.thread_id(),
                run_loop.thread_id(),
                "file source is already bound to another loop"
            );
        }
        debug!(name = %run_loop.name(), "File source bound to loop");
        *bound = Some(run_loop);
    }

    pub fn has_loop(&self) -> bool {
        self.shared.run_loop.lock().is_some()
    }

    /// Unbinds the loop. Every outstanding listener fails with
    /// [`FetchError::Canceled`] and transfers are aborted.
    ///
    /// Must be called on the bound loop thread. The source is already unbound
    /// when the listeners run.
    pub fn clear_loop(&self) {
        let run_loop = self.shared.bound_loop();
        assert!(run_loop.is_current(), "clear_loop called off the loop thread");

        let operations: Vec<(String, Operation)> = {
            let mut state = self.shared.state.lock();
            state.registry.drain().collect()
        };
        *self.shared.run_loop.lock() = None;

        info!(pending = operations.len(), "Clearing file source loop");
        for (url, op) in operations {
            if let Some(transfer) = &op.transfer {
                transfer.abort();
            }
            trace!(url = %url, kind = %op.kind, "Canceling operation");
            for listener in op.listeners {
                if let Some(request) = listener.upgrade() {
                    request.deliver(Err(FetchError::Canceled));
                }
            }
        }
    }

    /// Posts `f` to the bound loop.
    pub fn prepare<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.bound_loop().invoke(f).is_err() {
            warn!("Loop closed, prepared job dropped");
        }
    }

    /// Number of live network operations, deferred ones included. Callable
    /// from any thread.
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().registry.len()
    }

    /// Summary of the cache store.
    pub fn cache_stats(&self) -> StoreStats {
        self.shared.state.lock().store.stats()
    }

    /// Resolves a locator to an absolute http(s) URL.
    pub fn resolve(&self, locator: &str) -> Result<Url, FetchError> {
        let unsupported = |reason: String| FetchError::Unsupported {
            locator: locator.to_string(),
            reason,
        };

        let url = match Url::parse(locator) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let config = self.shared.config.lock();
                let base = config
                    .base
                    .as_ref()
                    .ok_or_else(|| unsupported("relative locator without a base URL".to_string()))?;
                base.join(locator).map_err(|e| unsupported(e.to_string()))?
            }
            Err(e) => return Err(unsupported(e.to_string())),
        };

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(unsupported(format!("unsupported scheme {}", other))),
        }
    }

    /// Appends the access token unless it is empty or already present.
    fn with_token(&self, url: &Url) -> String {
        let token = self.access_token();
        if token.is_empty() || url.query_pairs().any(|(key, _)| key == ACCESS_TOKEN_PARAM) {
            return url.to_string();
        }
        let mut url = url.clone();
        url.query_pairs_mut().append_pair(ACCESS_TOKEN_PARAM, &token);
        url.to_string()
    }

    fn is_local(locator: &str) -> bool {
        locator.starts_with(FILE_SCHEME) || locator.starts_with(ASSET_SCHEME)
    }
}

impl FileSource for CachingHttpFileSource {
    fn request(&self, kind: ResourceKind, locator: &str, callback: Callback) -> Request {
        let run_loop = self.shared.bound_loop();
        assert!(
            run_loop.is_current(),
            "requests must be issued on the bound loop thread"
        );

        if Self::is_local(locator) {
            let root = self.shared.config.lock().asset_root.clone();
            return AssetSource::new(root, run_loop).request(kind, locator, callback);
        }

        let url = match self.resolve(locator) {
            Ok(url) => url,
            Err(e) => {
                let state = RequestState::new(kind, locator, callback);
                state.deliver_later(&run_loop, Err(e));
                return Request::new(state);
            }
        };
        let key = url.to_string();
        let state = RequestState::new(kind, key.as_str(), callback);
        let listener = Arc::downgrade(&state);
        let request = Request::new(Arc::clone(&state));

        let mut loop_state = self.shared.state.lock();

        if let Some(op) = loop_state.registry.get_mut(&key) {
            op.listeners.push(listener);
            trace!(url = %key, listeners = op.listeners.len(), "Joined pending operation");
            return request;
        }

        let now = Utc::now();
        let reachable = self.shared.is_reachable();
        let cached = loop_state.lookup(&key);
        if let Some(record) = &cached {
            if record.is_fresh(now) || !reachable {
                trace!(url = %key, fresh = record.is_fresh(now), "Serving from cache");
                if let Err(e) = loop_state.store.touch(&key, now) {
                    warn!(error = %e, url = %key, "Failed to update cache access time");
                }
                state.deliver_later(&run_loop, Ok(Response::from_record(record, ResponseSource::Cache)));
                return request;
            }
        }

        let id = loop_state.next_operation;
        loop_state.next_operation += 1;

        let fetch_url = self.with_token(&url);
        let transfer = if reachable {
            let validators = cached.as_ref().and_then(CacheRecord::validators);
            Some(self.shared.start_transfer(&run_loop, key.clone(), id, fetch_url.clone(), validators))
        } else {
            debug!(url = %key, "Offline, deferring transfer");
            None
        };

        loop_state.registry.insert(
            key,
            Operation {
                id,
                kind,
                fetch_url,
                listeners: vec![listener],
                stale: cached,
                transfer,
            },
        );
        request
    }
}

impl std::fmt::Debug for CachingHttpFileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingHttpFileSource")
            .field("base", &self.base())
            .field("reachable", &self.is_reachable())
            .field("bound", &self.has_loop())
            .finish()
    }
}
