//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tilestream::run_loop::{LoopHandle, RunLoop};
use tilestream::storage::{
    CacheStore, CachingHttpFileSource, FetchError, FileSource, Freshness, HttpClient, HttpResponse,
    MemoryStore, Request, ResourceKind, Response, Validators,
};
use tilestream::wire::{zigzag_encode, WireWriter};
use tokio::sync::Semaphore;

pub const WAIT: Duration = Duration::from_secs(5);

type Script = Box<dyn Fn(&str, Option<&Validators>) -> Result<HttpResponse, FetchError> + Send + Sync>;

/// HTTP client answering from a script, optionally holding every response
/// until the test opens the gate.
pub struct ScriptedClient {
    script: Script,
    gate: Option<Semaphore>,
    calls: Mutex<Vec<(String, Option<Validators>)>>,
}

impl ScriptedClient {
    pub fn new<F>(script: F) -> Arc<Self>
    where
        F: Fn(&str, Option<&Validators>) -> Result<HttpResponse, FetchError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            gate: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn gated<F>(script: F) -> Arc<Self>
    where
        F: Fn(&str, Option<&Validators>) -> Result<HttpResponse, FetchError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            script: Box::new(script),
            gate: Some(Semaphore::new(0)),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Serves `body` for every URL with a one hour lifetime.
    pub fn serving(body: &'static [u8]) -> Arc<Self> {
        Self::new(move |_, _| Ok(fresh(body, Some(3600))))
    }

    pub fn open(&self, transfers: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(transfers);
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<(String, Option<Validators>)> {
        self.calls.lock().clone()
    }
}

impl HttpClient for ScriptedClient {
    fn get<'a>(
        &'a self,
        url: &'a str,
        validators: Option<&'a Validators>,
    ) -> BoxFuture<'a, Result<HttpResponse, FetchError>> {
        Box::pin(async move {
            self.calls.lock().push((url.to_string(), validators.cloned()));
            if let Some(gate) = &self.gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            (self.script)(url, validators)
        })
    }
}

pub fn fresh(body: &'static [u8], max_age: Option<i64>) -> HttpResponse {
    HttpResponse::Fresh {
        data: Bytes::from_static(body),
        freshness: Freshness {
            expires: max_age.map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
            modified: None,
            etag: Some("\"v1\"".to_string()),
        },
    }
}

pub type Outcome = Result<Response, FetchError>;

/// A loop-bound source plus helpers that issue requests on the loop.
pub struct Harness {
    pub run_loop: RunLoop,
    pub source: CachingHttpFileSource,
    pub client: Arc<ScriptedClient>,
}

impl Harness {
    pub fn new(client: Arc<ScriptedClient>) -> Self {
        Self::with_store(client, Box::new(MemoryStore::new()))
    }

    pub fn with_store(client: Arc<ScriptedClient>, store: Box<dyn CacheStore>) -> Self {
        let run_loop = RunLoop::start("test-loop").unwrap();
        let http: Arc<dyn HttpClient> = client.clone();
        let source = CachingHttpFileSource::new(store, http);
        source.set_loop(run_loop.handle());
        Self {
            run_loop,
            source,
            client,
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.run_loop.handle()
    }

    /// Issues a request on the loop; results arrive on the returned channel
    /// together with whether the callback ran on the loop thread.
    pub fn request(&self, locator: &str) -> (Request, mpsc::Receiver<(bool, Outcome)>) {
        let (tx, rx) = mpsc::channel();
        let source = self.source.clone();
        let locator = locator.to_string();
        let probe = self.handle();
        let request = self
            .handle()
            .call(move || {
                source.request(
                    ResourceKind::Tile,
                    &locator,
                    Box::new(move |outcome| {
                        let _ = tx.send((probe.is_current(), outcome));
                    }),
                )
            })
            .unwrap();
        (request, rx)
    }

    /// Requests `locator` and waits for the outcome.
    pub fn fetch(&self, locator: &str) -> Outcome {
        let (request, rx) = self.request(locator);
        let (_, outcome) = rx.recv_timeout(WAIT).unwrap();
        drop(request);
        outcome
    }

    /// Cancels a request on the loop thread.
    pub fn cancel(&self, request: Request) {
        self.handle()
            .call(move || {
                let mut request = request;
                request.cancel();
            })
            .unwrap();
    }

    pub fn pending(&self) -> usize {
        let source = self.source.clone();
        self.handle().call(move || source.pending_count()).unwrap()
    }

    /// Polls until no operation is pending.
    pub fn wait_idle(&self) {
        wait_until(|| self.pending() == 0);
    }
}

pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// A tile with one "water" layer holding an ocean and a lake square.
pub fn water_tile() -> Vec<u8> {
    let command = |id: u32, count: u32| (count << 3) | id;
    let zz = |v: i64| zigzag_encode(v) as u32;
    let square = vec![
        command(1, 1),
        zz(2),
        zz(3),
        command(2, 3),
        zz(10),
        zz(0),
        zz(0),
        zz(10),
        zz(-10),
        zz(0),
        command(7, 1),
    ];

    let feature = |id: u64, value_index: u32| {
        let mut w = WireWriter::new();
        w.varint_field(1, id)
            .packed_field(2, &[0, value_index])
            .varint_field(3, 3)
            .packed_field(4, &square);
        w.into_bytes()
    };
    let value = |s: &str| {
        let mut w = WireWriter::new();
        w.bytes_field(1, s.as_bytes());
        w.into_bytes()
    };

    let mut layer = WireWriter::new();
    layer
        .varint_field(15, 2)
        .bytes_field(1, b"water")
        .bytes_field(2, &feature(1, 0))
        .bytes_field(2, &feature(2, 1))
        .bytes_field(3, b"class")
        .bytes_field(4, &value("ocean"))
        .bytes_field(4, &value("lake"))
        .varint_field(5, 4096);

    let mut tile = WireWriter::new();
    tile.bytes_field(3, layer.as_bytes());
    tile.into_bytes()
}

/// Another handle to the source, as tiles hold it.
pub fn as_file_source(source: &CachingHttpFileSource) -> Arc<dyn FileSource> {
    Arc::new(source.clone())
}
