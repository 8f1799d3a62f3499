//! CLI error type.

use std::path::PathBuf;

use thiserror::Error;
use tilestream::config::ConfigError;
use tilestream::run_loop::LoopError;
use tilestream::storage::{FetchError, StoreError};
use tilestream::style::StyleError;
use tilestream::tile::TileIdError;
use tilestream::vector_tile::DecodeError;

/// Errors surfaced to the user by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Store(#[from] StoreError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Run loop error: {0}")]
    Loop(#[from] LoopError),

    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Invalid style: {0}")]
    Style(#[from] StyleError),

    #[error("Invalid tile: {0}")]
    TileId(#[from] TileIdError),

    #[error("Tile {0}")]
    Tile(String),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CliError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CliError::Io {
            path: path.into(),
            source,
        }
    }
}
