//! Fetch command - retrieve one resource through the caching source.

use std::path::PathBuf;

use clap::Args;
use tilestream::config::ConfigFile;

use super::common::{format_size, KindArg, Session, SourceOptions};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// URL, path relative to the base URL, or asset:// / file:// locator
    pub locator: String,

    /// Resource kind
    #[arg(long, value_enum, default_value_t = KindArg::Unknown)]
    pub kind: KindArg,

    /// Write the payload to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub source: SourceOptions,
}

pub fn run(args: FetchArgs) -> Result<(), CliError> {
    let config = ConfigFile::load()?;
    let session = Session::open(&config, &args.source)?;
    let result = session.fetch(args.kind.into(), &args.locator);
    session.close()?;
    let response = result?;

    println!("Fetched {}", args.locator);
    println!("  Source:  {:?}", response.source);
    println!("  Size:    {}", format_size(response.data.len() as u64));
    if let Some(expires) = response.expires {
        println!("  Expires: {}", expires.to_rfc3339());
    }
    if let Some(etag) = &response.etag {
        println!("  ETag:    {}", etag);
    }

    if let Some(path) = args.output {
        std::fs::write(&path, &response.data).map_err(|e| CliError::io(&path, e))?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}
