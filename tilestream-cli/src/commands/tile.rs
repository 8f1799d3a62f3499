//! Tile command - run one tile through fetch, parse and bucket building.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Args;
use tilestream::config::ConfigFile;
use tilestream::storage::FileSource;
use tilestream::tile::{TileData, TileId, TileState};

use super::common::{load_style, print_buckets, Session, SourceOptions};
use crate::error::CliError;

/// Upper bound on waiting for a tile to load.
const LOAD_TIMEOUT: Duration = Duration::from_secs(60);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Args)]
pub struct TileArgs {
    /// Tile id as z/x/y
    pub id: String,

    /// Bucket rules as JSON
    #[arg(long)]
    pub style: PathBuf,

    /// URL template with {z}, {x} and {y}; defaults to the configured one
    #[arg(long)]
    pub template: Option<String>,

    #[command(flatten)]
    pub source: SourceOptions,
}

pub fn run(args: TileArgs) -> Result<(), CliError> {
    let id: TileId = args.id.parse()?;
    let style = load_style(&args.style)?;
    let config = ConfigFile::load()?;
    let template = args
        .template
        .clone()
        .unwrap_or_else(|| config.source.tile_template.clone());

    let session = Session::open(&config, &args.source)?;
    let source: Arc<dyn FileSource> = Arc::new(session.source.clone());
    let tile = TileData::new(id, &template, style, source);

    let result = load(&session, &tile);
    if result.is_err() {
        tile.cancel();
    }
    session.close()?;
    result?;

    if tile.state() != TileState::Parsed {
        return Err(CliError::Tile(format!("{} could not be decoded", tile.id())));
    }
    println!("Tile {} ({})", tile.id(), tile.url());
    print_buckets(&tile.buckets());
    Ok(())
}

/// Requests the tile on the loop and waits for it to leave `Loading`, then
/// parses it.
fn load(session: &Session, tile: &Arc<TileData>) -> Result<(), CliError> {
    let requested = Arc::clone(tile);
    if !session.handle().call(move || requested.request())? {
        return Err(CliError::Tile(format!("{} cannot be requested", tile)));
    }

    let deadline = Instant::now() + LOAD_TIMEOUT;
    while tile.state() == TileState::Loading {
        if Instant::now() >= deadline {
            return Err(CliError::Tile(format!("{} timed out", tile.id())));
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    if tile.state() != TileState::Loaded {
        return Err(CliError::Tile(format!("{} failed to load", tile.id())));
    }
    tile.parse();
    Ok(())
}
