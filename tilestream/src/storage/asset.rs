//! Local file source.
//!
//! Reads run on a one-off background thread so the loop never blocks on
//! disk. Each request is tracked by an [`AssetRequestBaton`] that carries the
//! result back to the issuing loop thread.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{Callback, FetchError, FileSource, Listener, Request, RequestState, ResourceKind, Response};
use crate::run_loop::LoopHandle;

/// Scheme for paths relative to the asset root.
pub const ASSET_SCHEME: &str = "asset://";

/// Scheme for filesystem paths.
pub const FILE_SCHEME: &str = "file://";

/// Serves `asset://`, `file://` and bare relative paths from a root directory.
#[derive(Debug, Clone)]
pub struct AssetSource {
    root: PathBuf,
    run_loop: LoopHandle,
}

impl AssetSource {
    pub fn new(root: impl Into<PathBuf>, run_loop: LoopHandle) -> Self {
        Self {
            root: root.into(),
            run_loop,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a locator to a filesystem path.
    ///
    /// `asset://` and bare paths must stay inside the root. `file://` paths
    /// are taken as-is when absolute.
    pub fn resolve(&self, locator: &str) -> Result<PathBuf, FetchError> {
        let unsupported = |reason: &str| FetchError::Unsupported {
            locator: locator.to_string(),
            reason: reason.to_string(),
        };

        if let Some(rest) = locator.strip_prefix(FILE_SCHEME) {
            let path = Path::new(rest);
            if path.is_absolute() {
                return Ok(path.to_path_buf());
            }
            return self.join_relative(path).ok_or_else(|| unsupported("path escapes asset root"));
        }

        let relative = locator.strip_prefix(ASSET_SCHEME).unwrap_or(locator);
        if relative.contains("://") {
            return Err(unsupported("not a local resource"));
        }
        self.join_relative(Path::new(relative.trim_start_matches('/')))
            .ok_or_else(|| unsupported("path escapes asset root"))
    }

    fn join_relative(&self, relative: &Path) -> Option<PathBuf> {
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes || relative.as_os_str().is_empty() {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl FileSource for AssetSource {
    fn request(&self, kind: ResourceKind, locator: &str, callback: Callback) -> Request {
        assert!(
            self.run_loop.is_current(),
            "asset requests must be issued on the loop thread"
        );

        let path = match self.resolve(locator) {
            Ok(path) => path,
            Err(e) => {
                let state = RequestState::new(kind, locator, callback);
                state.deliver_later(&self.run_loop, Err(e));
                return Request::new(state);
            }
        };

        let state = RequestState::new(kind, path.display().to_string(), callback);
        let baton = AssetRequestBaton::new(path, &state, self.run_loop.clone());

        if let Err(e) = Arc::clone(&baton).start() {
            state.deliver_later(&self.run_loop, Err(e));
            return Request::new(state);
        }

        Request::with_detach(state, Box::new(move || baton.cancel()))
    }
}

/// Bookkeeping for one in-flight file read.
///
/// The baton is shared between the reader thread and the request. It holds
/// only a weak reference to the request, which [`cancel`](Self::cancel)
/// detaches.
pub struct AssetRequestBaton {
    thread_id: ThreadId,
    path: PathBuf,
    request: Mutex<Option<Listener>>,
    canceled: AtomicBool,
    run_loop: LoopHandle,
}

impl AssetRequestBaton {
    pub(crate) fn new(path: PathBuf, request: &Arc<RequestState>, run_loop: LoopHandle) -> Arc<Self> {
        Arc::new(Self {
            thread_id: thread::current().id(),
            path,
            request: Mutex::new(Some(Arc::downgrade(request))),
            canceled: AtomicBool::new(false),
            run_loop,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Spawns the reader thread.
    pub(crate) fn start(self: Arc<Self>) -> Result<(), FetchError> {
        let path = self.path.display().to_string();
        thread::Builder::new()
            .name("asset-reader".to_string())
            .spawn(move || self.run())
            .map(|_| ())
            .map_err(|e| FetchError::Io {
                path,
                reason: format!("failed to spawn reader: {}", e),
            })
    }

    /// Performs the blocking read. Runs on the reader thread.
    fn run(self: Arc<Self>) {
        if self.is_canceled() {
            self.cleanup();
            return;
        }
        match fs::read(&self.path) {
            Ok(data) => self.notify_success(Bytes::from(data)),
            Err(e) => {
                let error = io_error(&self.path, &e);
                self.notify_error(error);
            }
        }
    }

    fn notify_success(self: Arc<Self>, data: Bytes) {
        trace!(path = %self.path.display(), bytes = data.len(), "Asset read");
        self.notify(Ok(Response::file(data)));
    }

    fn notify_error(self: Arc<Self>, error: FetchError) {
        debug!(path = %self.path.display(), error = %error, "Asset read failed");
        self.notify(Err(error));
    }

    fn notify(self: Arc<Self>, result: Result<Response, FetchError>) {
        if self.is_canceled() {
            self.cleanup();
            return;
        }

        let baton = Arc::clone(&self);
        if self.run_loop.invoke(move || baton.deliver(result)).is_err() {
            debug!(path = %self.path.display(), "Loop closed before asset delivery");
            self.cleanup();
        }
    }

    /// Runs on the issuing loop thread after the hop.
    fn deliver(&self, result: Result<Response, FetchError>) {
        assert_eq!(
            thread::current().id(),
            self.thread_id,
            "asset result delivered off the issuing thread"
        );

        if !self.is_canceled() {
            let request = self.request.lock().take().and_then(|weak| weak.upgrade());
            if let Some(request) = request {
                request.deliver(result);
            }
        }
        self.cleanup();
    }

    /// Stops any pending delivery and detaches from the request.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
        self.request.lock().take();
    }

    fn cleanup(&self) {
        self.request.lock().take();
    }
}

impl std::fmt::Debug for AssetRequestBaton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetRequestBaton")
            .field("path", &self.path)
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

fn io_error(path: &Path, error: &io::Error) -> FetchError {
    let display = path.display().to_string();
    match error.kind() {
        io::ErrorKind::NotFound => FetchError::NotFound { url: display },
        io::ErrorKind::PermissionDenied => FetchError::AccessDenied { url: display },
        _ => FetchError::Io {
            path: display,
            reason: error.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_loop::RunLoop;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    type Outcome = (bool, Result<Response, FetchError>);

    fn fetch(source: &AssetSource, handle: &LoopHandle, locator: &str) -> Outcome {
        let (tx, rx) = mpsc::channel();
        let source = source.clone();
        let locator = locator.to_string();
        let probe = handle.clone();
        let request = handle
            .call(move || {
                source.request(
                    ResourceKind::Unknown,
                    &locator,
                    Box::new(move |result| {
                        let _ = tx.send((probe.is_current(), result));
                    }),
                )
            })
            .unwrap();
        let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        drop(request);
        outcome
    }

    #[test]
    fn test_reads_asset_and_delivers_on_loop() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("style.json"), b"{}").unwrap();
        let run_loop = RunLoop::start("asset-test").unwrap();
        let handle = run_loop.handle();
        let source = AssetSource::new(dir.path(), handle.clone());

        let (on_loop, result) = fetch(&source, &handle, "asset://style.json");
        assert!(on_loop);
        let response = result.unwrap();
        assert_eq!(response.data, Bytes::from_static(b"{}"));
        assert_eq!(response.source, super::super::ResponseSource::File);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let run_loop = RunLoop::start("asset-test").unwrap();
        let handle = run_loop.handle();
        let source = AssetSource::new(dir.path(), handle.clone());

        let (_, result) = fetch(&source, &handle, "asset://missing.pbf");
        assert!(matches!(result, Err(FetchError::NotFound { .. })));
    }

    #[test]
    fn test_escaping_root_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let run_loop = RunLoop::start("asset-test").unwrap();
        let handle = run_loop.handle();
        let source = AssetSource::new(dir.path(), handle.clone());

        let (_, result) = fetch(&source, &handle, "asset://../secret");
        assert!(matches!(result, Err(FetchError::Unsupported { .. })));
    }

    #[test]
    fn test_resolve_forms() {
        let run_loop = RunLoop::start("asset-test").unwrap();
        let source = AssetSource::new("/data", run_loop.handle());

        assert_eq!(source.resolve("asset://a/b.pbf").unwrap(), PathBuf::from("/data/a/b.pbf"));
        assert_eq!(source.resolve("a/b.pbf").unwrap(), PathBuf::from("/data/a/b.pbf"));
        assert_eq!(source.resolve("file:///tmp/x").unwrap(), PathBuf::from("/tmp/x"));
        assert!(source.resolve("https://example.com/x").is_err());
        assert!(source.resolve("asset://").is_err());
    }

    #[test]
    fn test_canceled_request_never_delivers() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("tile.pbf"), vec![0u8; 1024]).unwrap();
        let run_loop = RunLoop::start("asset-test").unwrap();
        let handle = run_loop.handle();
        let source = AssetSource::new(dir.path(), handle.clone());
        let (tx, rx) = mpsc::channel::<()>();

        handle
            .call(move || {
                let mut request = source.request(
                    ResourceKind::Tile,
                    "tile.pbf",
                    Box::new(move |_| {
                        let _ = tx.send(());
                    }),
                );
                request.cancel();
            })
            .unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn test_baton_cancel_detaches_request() {
        let run_loop = RunLoop::start("asset-test").unwrap();
        let state = RequestState::new(ResourceKind::Tile, "p", Box::new(|_| {}));
        let baton = AssetRequestBaton::new(PathBuf::from("p"), &state, run_loop.handle());

        assert!(!baton.is_canceled());
        baton.cancel();
        assert!(baton.is_canceled());
        assert!(baton.request.lock().is_none());
    }

    #[test]
    fn test_io_error_mapping() {
        let path = Path::new("/x");
        assert!(matches!(
            io_error(path, &io::Error::from(io::ErrorKind::PermissionDenied)),
            FetchError::AccessDenied { .. }
        ));
        assert!(matches!(
            io_error(path, &io::Error::from(io::ErrorKind::InvalidData)),
            FetchError::Io { .. }
        ));
    }
}
