//! Decode command - inspect a tile file on disk.

use std::path::PathBuf;

use clap::Args;
use tilestream::vector_tile::{decode_buckets, decompress, VectorTile};

use super::common::{load_style, print_buckets};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Tile payload (raw or gzip-compressed)
    pub file: PathBuf,

    /// Bucket rules as JSON; without it, layers are listed
    #[arg(long)]
    pub style: Option<PathBuf>,

    /// Zoom level used to select bucket rules
    #[arg(long, default_value_t = 14.0)]
    pub zoom: f32,
}

pub fn run(args: DecodeArgs) -> Result<(), CliError> {
    let data = std::fs::read(&args.file).map_err(|e| CliError::io(&args.file, e))?;

    match &args.style {
        Some(style_path) => {
            let style = load_style(style_path)?;
            let buckets = decode_buckets(&data, &style, args.zoom)?;
            println!("{} at zoom {}:", args.file.display(), args.zoom);
            print_buckets(&buckets);
        }
        None => {
            let payload = decompress(&data)?;
            let tile = VectorTile::decode(&payload)?;
            println!("{}: {} layers", args.file.display(), tile.layers.len());
            for layer in &tile.layers {
                println!(
                    "  {:<24} v{}  extent: {:>5}  features: {:>6}  keys: {:>4}  values: {:>4}",
                    layer.name,
                    layer.version,
                    layer.extent,
                    layer.features.len(),
                    layer.keys.len(),
                    layer.values.len()
                );
            }
        }
    }
    Ok(())
}
