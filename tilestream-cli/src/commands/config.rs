//! Configuration management CLI commands.
//!
//! Provides `config get`, `config set`, `config list`, and `config path`.

use std::path::Path;

use clap::Subcommand;
use tilestream::config::{config_file_path, ConfigError, ConfigFile, CONFIG_KEYS};

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Get a configuration value
    Get {
        /// Configuration key in format section.key (e.g., source.base_url)
        key: String,
    },

    /// Set a configuration value (an empty value clears optional keys)
    Set {
        /// Configuration key in format section.key (e.g., cache.kind)
        key: String,

        /// Value to set
        value: String,
    },

    /// List all configuration settings
    List,

    /// Show the configuration file path
    Path,
}

/// Run a config subcommand against the default config file.
pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    run_at(command, &config_file_path())
}

fn run_at(command: ConfigCommands, path: &Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::Get { key } => run_get(path, &key),
        ConfigCommands::Set { key, value } => run_set(path, &key, &value),
        ConfigCommands::List => run_list(path),
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn unknown_key(key: &str) -> CliError {
    CliError::Config(format!(
        "Unknown configuration key '{}'. Use 'tilestream config list' to see available keys.",
        key
    ))
}

fn lookup(config: &ConfigFile, key: &str) -> Result<Option<String>, CliError> {
    match config.get(key) {
        Ok(value) => Ok(value),
        Err(ConfigError::UnknownKey(_)) => Err(unknown_key(key)),
        Err(e) => Err(e.into()),
    }
}

fn run_get(path: &Path, key: &str) -> Result<(), CliError> {
    let config = ConfigFile::load_from(path)?;
    match lookup(&config, key)? {
        Some(value) => println!("{}", value),
        None => println!("(not set)"),
    }
    Ok(())
}

fn run_set(path: &Path, key: &str, value: &str) -> Result<(), CliError> {
    let mut config = ConfigFile::load_from(path)?;
    match config.set(key, value) {
        Ok(()) => {}
        Err(ConfigError::UnknownKey(_)) => return Err(unknown_key(key)),
        Err(e) => return Err(e.into()),
    }
    config.save_to(path)?;
    println!("Set {} = {}", key, value);
    Ok(())
}

fn run_list(path: &Path) -> Result<(), CliError> {
    let config = ConfigFile::load_from(path)?;

    println!("Configuration Settings");
    println!("======================");

    let mut current_section = "";
    for key in CONFIG_KEYS {
        let (section, name) = key.split_once('.').unwrap_or(("", key));
        if section != current_section {
            println!();
            println!("[{}]", section);
            current_section = section;
        }

        match config.get(key)? {
            Some(value) => println!("  {} = {}", name, value),
            None => println!("  {} = (not set)", name),
        }
    }
    Ok(())
}
