//! Tile identity and the per-tile fetch/decode state machine.
//!
//! ```text
//! Invalid                    (id out of range, never requested)
//! Initial ─request()─► Loading ─response─► Loaded ─parse()─► Parsed
//!    │                    │                   │
//!    └────────────────────┴─── cancel() / error ──► Obsolete
//! ```
//!
//! `Obsolete` is terminal. A [`TileData`] never mutates after it becomes
//! obsolete, however late a response or parse result arrives.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::storage::{FetchError, FileSource, Request, ResourceKind, Response};
use crate::style::Style;
use crate::vector_tile::decode_buckets;

pub use crate::vector_tile::Bucket;

/// Deepest supported zoom level.
pub const MAX_ZOOM: u8 = 22;

/// Errors parsing a tile id from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileIdError {
    #[error("expected z/x/y, got {0:?}")]
    Format(String),

    #[error("tile {0} is outside the tile pyramid")]
    OutOfRange(String),
}

/// Position of a tile in the quad-tree pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileId {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// True when `z <= MAX_ZOOM` and both coordinates fit the zoom level.
    pub fn is_valid(&self) -> bool {
        if self.z > MAX_ZOOM {
            return false;
        }
        let dim = 1u64 << self.z;
        u64::from(self.x) < dim && u64::from(self.y) < dim
    }

    /// Expands `{z}`, `{x}` and `{y}` in a URL template.
    pub fn url(&self, template: &str) -> String {
        template
            .replace("{z}", &self.z.to_string())
            .replace("{x}", &self.x.to_string())
            .replace("{y}", &self.y.to_string())
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

impl FromStr for TileId {
    type Err = TileIdError;

    /// Parses `z/x/y`. Range is checked.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format = || TileIdError::Format(s.to_string());
        let mut parts = s.trim().split('/');
        let (Some(z), Some(x), Some(y), None) = (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format());
        };

        let id = TileId::new(
            z.parse().map_err(|_| format())?,
            x.parse().map_err(|_| format())?,
            y.parse().map_err(|_| format())?,
        );
        if !id.is_valid() {
            return Err(TileIdError::OutOfRange(id.to_string()));
        }
        Ok(id)
    }
}

/// Lifecycle state of a [`TileData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileState {
    Invalid,
    Initial,
    Loading,
    Loaded,
    Parsed,
    Obsolete,
}

impl fmt::Display for TileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TileState::Invalid => "invalid",
            TileState::Initial => "initial",
            TileState::Loading => "loading",
            TileState::Loaded => "loaded",
            TileState::Parsed => "parsed",
            TileState::Obsolete => "obsolete",
        };
        f.write_str(name)
    }
}

struct TileInner {
    state: TileState,
    data: Option<Bytes>,
    buckets: BTreeMap<String, Bucket>,
    request: Option<Request>,
}

/// One tile's fetch, decode and bucket state.
///
/// Held as `Arc<TileData>`; the in-flight request only keeps a weak
/// reference back, so dropping the last `Arc` cancels the fetch.
pub struct TileData {
    id: TileId,
    url: String,
    style: Arc<Style>,
    source: Arc<dyn FileSource>,
    inner: Mutex<TileInner>,
}

impl TileData {
    /// Creates a tile whose URL is `template` expanded for `id`.
    pub fn new(id: TileId, template: &str, style: Arc<Style>, source: Arc<dyn FileSource>) -> Arc<Self> {
        let state = if id.is_valid() {
            TileState::Initial
        } else {
            TileState::Invalid
        };

        Arc::new(Self {
            id,
            url: id.url(template),
            style,
            source,
            inner: Mutex::new(TileInner {
                state,
                data: None,
                buckets: BTreeMap::new(),
                request: None,
            }),
        })
    }

    pub fn id(&self) -> TileId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> TileState {
        self.inner.lock().state
    }

    /// True while raw bytes are held (between load and parse).
    pub fn has_data(&self) -> bool {
        self.inner.lock().data.is_some()
    }

    /// Snapshot of the built buckets.
    pub fn buckets(&self) -> BTreeMap<String, Bucket> {
        self.inner.lock().buckets.clone()
    }

    pub fn bucket(&self, name: &str) -> Option<Bucket> {
        self.inner.lock().buckets.get(name).cloned()
    }

    /// Starts fetching the tile. Only valid from `Initial`; returns false
    /// without doing anything otherwise.
    ///
    /// Must be called on the file source's loop thread.
    pub fn request(self: &Arc<Self>) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state != TileState::Initial {
                return false;
            }
            inner.state = TileState::Loading;
        }

        let tile: Weak<Self> = Arc::downgrade(self);
        let request = self.source.request(
            ResourceKind::Tile,
            &self.url,
            Box::new(move |result| {
                if let Some(tile) = tile.upgrade() {
                    tile.on_response(result);
                }
            }),
        );
        debug!(tile = %self.id, url = %self.url, "Tile requested");

        // A cancel may have raced the request; the handle is released then.
        let rejected = {
            let mut inner = self.inner.lock();
            if inner.state == TileState::Loading {
                inner.request = Some(request);
                None
            } else {
                Some(request)
            }
        };
        drop(rejected);
        true
    }

    fn on_response(&self, result: Result<Response, FetchError>) {
        let finished = {
            let mut inner = self.inner.lock();
            if inner.state != TileState::Loading {
                trace!(tile = %self.id, state = %inner.state, "Ignoring late response");
                return;
            }
            match result {
                Ok(response) => {
                    trace!(
                        tile = %self.id,
                        bytes = response.data.len(),
                        cached = response.from_cache(),
                        "Tile loaded"
                    );
                    inner.data = Some(response.data);
                    inner.state = TileState::Loaded;
                }
                Err(e) => {
                    warn!(tile = %self.id, error = %e, "Tile fetch failed");
                    inner.state = TileState::Obsolete;
                }
            }
            inner.request.take()
        };
        drop(finished);
    }

    /// Decodes the loaded bytes into buckets. Only valid from `Loaded`.
    ///
    /// Returns true when the tile reached `Parsed`. A malformed payload makes
    /// the tile obsolete. The decode runs without holding the tile lock, so a
    /// concurrent cancel wins and the result is discarded.
    pub fn parse(&self) -> bool {
        let data = {
            let inner = self.inner.lock();
            match (&inner.state, &inner.data) {
                (TileState::Loaded, Some(data)) => data.clone(),
                _ => return false,
            }
        };

        let result = decode_buckets(&data, &self.style, f32::from(self.id.z));

        let mut inner = self.inner.lock();
        if inner.state != TileState::Loaded {
            trace!(tile = %self.id, state = %inner.state, "Discarding parse result");
            return false;
        }
        inner.data = None;
        match result {
            Ok(buckets) => {
                debug!(tile = %self.id, buckets = buckets.len(), "Tile parsed");
                inner.buckets = buckets;
                inner.state = TileState::Parsed;
                true
            }
            Err(e) => {
                warn!(tile = %self.id, error = %e, "Tile payload is malformed");
                inner.state = TileState::Obsolete;
                false
            }
        }
    }

    /// Abandons the tile from any state. Any outstanding request is
    /// released and raw bytes are dropped. Idempotent, callable from any
    /// thread.
    pub fn cancel(&self) {
        let request = {
            let mut inner = self.inner.lock();
            if inner.state != TileState::Obsolete {
                debug!(tile = %self.id, state = %inner.state, "Tile canceled");
            }
            inner.state = TileState::Obsolete;
            inner.data = None;
            inner.request.take()
        };
        drop(request);
    }
}

impl fmt::Display for TileData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.state())
    }
}

impl fmt::Debug for TileData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileData")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for TileData {
    fn drop(&mut self) {
        if let Some(request) = self.inner.get_mut().request.take() {
            trace!(tile = %self.id, "Releasing in-flight request");
            drop(request);
        }
    }
}
