//! CLI subcommands.

pub mod cache;
pub mod common;
pub mod config;
pub mod decode;
pub mod fetch;
pub mod tile;
