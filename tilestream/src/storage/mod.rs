//! Resource fetching: file sources, requests and the cache store.
//!
//! A [`FileSource`] turns a locator into a cancellable, one-shot [`Request`].
//! Two variants exist:
//!
//! - [`CachingHttpFileSource`]: network fetches with request coalescing and a
//!   persistent cache.
//! - [`AssetSource`]: local file reads performed off the loop thread.
//!
//! # Request contract
//!
//! - The completion callback fires at most once, with either a [`Response`]
//!   or a [`FetchError`].
//! - Requests are created and canceled on the source's loop thread, and the
//!   callback is always delivered there, whatever thread did the I/O.
//! - Canceling (or dropping) a request before completion guarantees the
//!   callback never fires. Canceling after completion is a no-op.
//! - Sources only hold weak references to requests. Once the issuer lets go
//!   of its [`Request`], nothing can be delivered to it.

mod asset;
mod caching;
mod http;
mod store;

pub use asset::{AssetRequestBaton, AssetSource};
pub use caching::CachingHttpFileSource;
pub use http::{Freshness, HttpClient, HttpResponse, ReqwestClient, Validators};
pub use store::{CacheRecord, CacheStore, DiskStore, MemoryStore, StoreError, StoreStats};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::run_loop::LoopHandle;

/// Kind of resource being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Unknown,
    Style,
    Source,
    Tile,
    Glyphs,
    SpriteImage,
    SpriteJson,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Unknown => "unknown",
            ResourceKind::Style => "style",
            ResourceKind::Source => "source",
            ResourceKind::Tile => "tile",
            ResourceKind::Glyphs => "glyphs",
            ResourceKind::SpriteImage => "sprite-image",
            ResourceKind::SpriteJson => "sprite-json",
        };
        f.write_str(name)
    }
}

/// Transfer errors delivered through a request's callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("access denied: {url}")]
    AccessDenied { url: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    /// The locator cannot be served by this source.
    #[error("unsupported resource {locator}: {reason}")]
    Unsupported { locator: String, reason: String },

    /// The source was torn down while the request was outstanding.
    #[error("request canceled")]
    Canceled,
}

/// Where a response's bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// A stale cache record confirmed by a 304 response.
    Revalidated,
    File,
}

/// A successful fetch: the payload plus its freshness hint.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub data: Bytes,
    pub expires: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub source: ResponseSource,
}

impl Response {
    /// A response for bytes read from the local filesystem.
    pub fn file(data: Bytes) -> Self {
        Self {
            data,
            expires: None,
            modified: None,
            etag: None,
            source: ResponseSource::File,
        }
    }

    /// True when the payload was served from the cache store.
    pub fn from_cache(&self) -> bool {
        matches!(self.source, ResponseSource::Cache | ResponseSource::Revalidated)
    }

    pub(crate) fn from_record(record: &CacheRecord, source: ResponseSource) -> Self {
        Self {
            data: record.data.clone(),
            expires: record.expires,
            modified: record.modified,
            etag: record.etag.clone(),
            source,
        }
    }
}

/// Completion callback of a request.
pub type Callback = Box<dyn FnOnce(Result<Response, FetchError>) + Send + 'static>;

/// A source of resources addressed by URL or path.
pub trait FileSource: Send + Sync {
    /// Starts fetching `locator`. Never blocks and never invokes `callback`
    /// before returning.
    fn request(&self, kind: ResourceKind, locator: &str, callback: Callback) -> Request;
}

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Shared state of one logical request.
///
/// The issuer's [`Request`] holds the only strong reference; sources keep
/// [`Weak`] listeners.
pub(crate) struct RequestState {
    id: u64,
    kind: ResourceKind,
    url: String,
    thread_id: ThreadId,
    token: CancellationToken,
    callback: Mutex<Option<Callback>>,
}

impl RequestState {
    /// Creates request state owned by the calling thread.
    pub(crate) fn new(kind: ResourceKind, url: impl Into<String>, callback: Callback) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            url: url.into(),
            thread_id: thread::current().id(),
            token: CancellationToken::new(),
            callback: Mutex::new(Some(callback)),
        })
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Invokes the callback unless the request was canceled or already done.
    ///
    /// Must run on the issuing thread. Returns true if the callback fired.
    pub(crate) fn deliver(&self, result: Result<Response, FetchError>) -> bool {
        assert_eq!(
            thread::current().id(),
            self.thread_id,
            "request {} delivered off its issuing thread",
            self.id
        );
        if self.token.is_cancelled() {
            return false;
        }
        let callback = { self.callback.lock().take() };
        match callback {
            Some(callback) => {
                callback(result);
                true
            }
            None => false,
        }
    }

    /// Delivers `result` from a later loop iteration, after a cancellation check.
    pub(crate) fn deliver_later(
        self: &Arc<Self>,
        run_loop: &LoopHandle,
        result: Result<Response, FetchError>,
    ) {
        let listener = Arc::downgrade(self);
        let posted = run_loop.invoke(move || {
            if let Some(state) = listener.upgrade() {
                state.deliver(result);
            }
        });
        if posted.is_err() {
            trace!(request = self.id, "Loop closed before deferred delivery");
        }
    }

    fn release(&self) {
        self.token.cancel();
        let callback = { self.callback.lock().take() };
        drop(callback);
    }

    fn is_completed(&self) -> bool {
        !self.token.is_cancelled() && self.callback.lock().is_none()
    }
}

pub(crate) type Listener = Weak<RequestState>;

type Detach = Box<dyn FnOnce() + Send + 'static>;

/// Handle to one outstanding fetch.
///
/// Dropping the handle cancels the request.
pub struct Request {
    state: Arc<RequestState>,
    detach: Option<Detach>,
}

impl Request {
    pub(crate) fn new(state: Arc<RequestState>) -> Self {
        Self {
            state,
            detach: None,
        }
    }

    /// Attaches a hook run once when the request is canceled or dropped.
    pub(crate) fn with_detach(state: Arc<RequestState>, detach: Detach) -> Self {
        Self {
            state,
            detach: Some(detach),
        }
    }

    /// The resolved URL or path.
    pub fn url(&self) -> &str {
        &self.state.url
    }

    pub fn kind(&self) -> ResourceKind {
        self.state.kind
    }

    pub fn is_canceled(&self) -> bool {
        self.state.is_canceled()
    }

    /// True once the callback has fired.
    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    /// Cancels the request. The callback will not fire after this returns.
    ///
    /// Must be called on the thread that created the request. Idempotent.
    pub fn cancel(&mut self) {
        assert_eq!(
            thread::current().id(),
            self.state.thread_id,
            "request {} canceled off its issuing thread",
            self.state.id
        );
        self.release();
    }

    fn release(&mut self) {
        if self.state.is_completed() {
            self.detach = None;
            return;
        }
        self.state.release();
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.state.id)
            .field("kind", &self.state.kind)
            .field("url", &self.state.url)
            .field("canceled", &self.state.is_canceled())
            .finish()
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback(count: &Arc<AtomicUsize>) -> Callback {
        let count = Arc::clone(count);
        Box::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn ok() -> Result<Response, FetchError> {
        Ok(Response::file(Bytes::from_static(b"x")))
    }

    #[test]
    fn test_callback_fires_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let state = RequestState::new(ResourceKind::Tile, "u", counting_callback(&count));
        let request = Request::new(Arc::clone(&state));

        assert!(state.deliver(ok()));
        assert!(!state.deliver(ok()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(request.is_completed());
    }

    #[test]
    fn test_cancel_prevents_delivery() {
        let count = Arc::new(AtomicUsize::new(0));
        let state = RequestState::new(ResourceKind::Tile, "u", counting_callback(&count));
        let mut request = Request::new(Arc::clone(&state));

        request.cancel();
        request.cancel();
        assert!(request.is_canceled());
        assert!(!state.deliver(ok()));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_releases_weak_listeners() {
        let count = Arc::new(AtomicUsize::new(0));
        let state = RequestState::new(ResourceKind::Tile, "u", counting_callback(&count));
        let listener: Listener = Arc::downgrade(&state);
        let request = Request::new(state);

        drop(request);
        assert!(listener.upgrade().is_none());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_detach_runs_on_cancel_but_not_after_completion() {
        let detached = Arc::new(AtomicUsize::new(0));

        let state = RequestState::new(ResourceKind::Tile, "u", Box::new(|_| {}));
        let d = Arc::clone(&detached);
        let mut pending = Request::with_detach(
            state,
            Box::new(move || {
                d.fetch_add(1, Ordering::SeqCst);
            }),
        );
        pending.cancel();
        drop(pending);
        assert_eq!(detached.load(Ordering::SeqCst), 1);

        let state = RequestState::new(ResourceKind::Tile, "u", Box::new(|_| {}));
        let d = Arc::clone(&detached);
        let done = Request::with_detach(
            Arc::clone(&state),
            Box::new(move || {
                d.fetch_add(1, Ordering::SeqCst);
            }),
        );
        state.deliver(ok());
        drop(done);
        assert_eq!(detached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_off_thread_panics() {
        let state = RequestState::new(ResourceKind::Tile, "u", Box::new(|_| {}));
        let request = Request::new(state);
        let result = std::thread::spawn(move || {
            let mut request = request;
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| request.cancel()));
            std::mem::forget(request);
            outcome
        })
        .join()
        .unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_resource_kind_display() {
        assert_eq!(ResourceKind::SpriteJson.to_string(), "sprite-json");
        assert_eq!(ResourceKind::Tile.to_string(), "tile");
    }
}
