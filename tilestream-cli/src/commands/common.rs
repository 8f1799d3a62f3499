//! Common types and utilities shared across CLI commands.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{mpsc, Arc};

use clap::{Args, ValueEnum};
use tilestream::config::ConfigFile;
use tilestream::run_loop::{LoopHandle, RunLoop};
use tilestream::storage::{
    CachingHttpFileSource, FetchError, FileSource, HttpClient, ReqwestClient, ResourceKind,
    Response,
};
use tilestream::style::Style;
use tilestream::tile::Bucket;
use tracing::debug;

use crate::error::CliError;

/// Name of the loop thread used by commands.
pub const LOOP_NAME: &str = "tilestream-loop";

/// Source settings that override the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct SourceOptions {
    /// Base URL for relative locators
    #[arg(long)]
    pub base_url: Option<String>,

    /// Access token appended to requests
    #[arg(long)]
    pub access_token: Option<String>,

    /// Serve from cache only, deferring network transfers
    #[arg(long)]
    pub offline: bool,

    /// Use an in-memory cache instead of the configured one
    #[arg(long)]
    pub no_disk_cache: bool,
}

/// Resource kind selection for CLI arguments.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum KindArg {
    #[default]
    Unknown,
    Style,
    Source,
    Tile,
    Glyphs,
    SpriteImage,
    SpriteJson,
}

impl From<KindArg> for ResourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Unknown => ResourceKind::Unknown,
            KindArg::Style => ResourceKind::Style,
            KindArg::Source => ResourceKind::Source,
            KindArg::Tile => ResourceKind::Tile,
            KindArg::Glyphs => ResourceKind::Glyphs,
            KindArg::SpriteImage => ResourceKind::SpriteImage,
            KindArg::SpriteJson => ResourceKind::SpriteJson,
        }
    }
}

/// A loop and a source bound to it.
pub struct Session {
    pub run_loop: RunLoop,
    pub source: CachingHttpFileSource,
}

impl Session {
    /// Builds a source from config with CLI overrides, bound to a new loop.
    pub fn open(config: &ConfigFile, options: &SourceOptions) -> Result<Self, CliError> {
        let store = if options.no_disk_cache {
            ConfigFile::default()
                .with_cache_kind(tilestream::config::CacheKind::Memory)
                .open_store()?
        } else {
            config.open_store()?
        };
        let client: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new()?);
        let source = CachingHttpFileSource::new(store, client);

        let base = options.base_url.as_ref().or(config.source.base_url.as_ref());
        if let Some(base) = base {
            source
                .set_base(base)
                .map_err(|e| CliError::Config(format!("invalid base URL {}: {}", base, e)))?;
        }
        let token = options
            .access_token
            .as_ref()
            .or(config.source.access_token.as_ref());
        if let Some(token) = token {
            source.set_access_token(token.as_str());
        }
        if let Ok(cwd) = std::env::current_dir() {
            source.set_asset_root(cwd);
        }
        if options.offline {
            source.set_reachability(false);
        }

        let run_loop = RunLoop::start(LOOP_NAME)?;
        source.set_loop(run_loop.handle());
        debug!(source = ?source, "Session opened");

        Ok(Self { run_loop, source })
    }

    pub fn handle(&self) -> LoopHandle {
        self.run_loop.handle()
    }

    /// Fetches one resource and blocks until it completes.
    pub fn fetch(&self, kind: ResourceKind, locator: &str) -> Result<Response, CliError> {
        let (tx, rx) = mpsc::channel();
        let source = self.source.clone();
        let locator = locator.to_string();
        let request = self.handle().call(move || {
            source.request(
                kind,
                &locator,
                Box::new(move |result| {
                    let _ = tx.send(result);
                }),
            )
        })?;

        let result = rx.recv().unwrap_or(Err(FetchError::Canceled));
        drop(request);
        Ok(result?)
    }

    /// Unbinds the source and stops the loop.
    pub fn close(self) -> Result<(), CliError> {
        let source = self.source.clone();
        self.handle().call(move || source.clear_loop())?;
        self.run_loop.shutdown();
        Ok(())
    }
}

/// Loads a bucket rule set from a JSON file.
pub fn load_style(path: &Path) -> Result<Arc<Style>, CliError> {
    let json = std::fs::read_to_string(path).map_err(|e| CliError::io(path, e))?;
    Ok(Arc::new(Style::from_json(&json)?))
}

/// Prints one line per bucket.
pub fn print_buckets(buckets: &BTreeMap<String, Bucket>) {
    if buckets.is_empty() {
        println!("No buckets matched.");
        return;
    }
    for (name, bucket) in buckets {
        println!(
            "  {:<24} {:?}  features: {:>6}  vertices: {:>8}",
            name,
            bucket.kind,
            bucket.features.len(),
            bucket.vertex_count()
        );
    }
}

/// Formats a byte count for display.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
