//! Cache management CLI commands.

use clap::Subcommand;
use tilestream::config::ConfigFile;

use super::common::format_size;
use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Remove every cached record
    Clear,
    /// Show cache statistics
    Stats,
}

/// Run a cache subcommand against the configured store.
pub fn run(action: CacheAction) -> Result<(), CliError> {
    run_with(action, &ConfigFile::load()?)
}

fn run_with(action: CacheAction, config: &ConfigFile) -> Result<(), CliError> {
    let mut store = config.open_store()?;

    println!(
        "Cache: {} ({})",
        config.cache.directory.display(),
        config.cache.kind
    );

    match action {
        CacheAction::Clear => {
            let before = store.stats();
            store.clear()?;
            println!(
                "Deleted {} records, freed {}",
                before.records,
                format_size(before.bytes)
            );
        }
        CacheAction::Stats => {
            let stats = store.stats();
            println!("  Records: {}", stats.records);
            println!("  Size:    {}", format_size(stats.bytes));
        }
    }
    Ok(())
}
