//! Tilestream CLI - Command-line interface
//!
//! Fetches, caches and decodes vector map tiles using the tilestream library.

mod commands;
mod error;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::cache::CacheAction;
use commands::config::ConfigCommands;
use commands::decode::DecodeArgs;
use commands::fetch::FetchArgs;
use commands::tile::TileArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "tilestream", version, about = "Fetch, cache and decode vector map tiles")]
struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch a resource through the cache
    Fetch(FetchArgs),

    /// Decode a tile file from disk
    Decode(DecodeArgs),

    /// Fetch and decode one tile by z/x/y
    Tile(TileArgs),

    /// View or change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Inspect or clear the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Fetch(args) => commands::fetch::run(args),
        Commands::Decode(args) => commands::decode::run(args),
        Commands::Tile(args) => commands::tile::run(args),
        Commands::Config { command } => commands::config::run(command),
        Commands::Cache { action } => commands::cache::run(action),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tilestream::logging::init(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_tile_command() {
        let cli = Cli::try_parse_from([
            "tilestream",
            "-v",
            "tile",
            "14/8192/5461",
            "--style",
            "style.json",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Tile(_)));
    }

    #[test]
    fn test_parse_config_set() {
        let cli =
            Cli::try_parse_from(["tilestream", "config", "set", "cache.kind", "memory"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                command: ConfigCommands::Set { .. }
            }
        ));
    }
}
