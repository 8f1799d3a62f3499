//! Tilestream - vector map tile fetching, caching and decoding
//!
//! This library fetches map tiles over HTTP or from local files, coalesces
//! and caches them on a single event-loop thread, and decodes their binary
//! payload into render buckets according to a set of bucket rules.
//!
//! The main entry points are [`storage::CachingHttpFileSource`] for fetching
//! and [`tile::TileData`] for the per-tile lifecycle.

pub mod config;
pub mod logging;
pub mod run_loop;
pub mod storage;
pub mod style;
pub mod tile;
pub mod vector_tile;
pub mod wire;

pub use run_loop::{LoopHandle, RunLoop};
pub use storage::{
    CachingHttpFileSource, FetchError, FileSource, Request, ResourceKind, Response,
};
pub use style::Style;
pub use tile::{TileData, TileId, TileState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
