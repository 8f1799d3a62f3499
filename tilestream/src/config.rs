//! INI configuration file.
//!
//! Lives at `<config dir>/tilestream/config.ini`:
//!
//! ```ini
//! [source]
//! base_url = https://tiles.example.com/v4/
//! access_token = pk.abc
//! tile_template = streets/{z}/{x}/{y}.pbf
//!
//! [cache]
//! directory = /home/me/.cache/tilestream
//! kind = disk
//! ```
//!
//! Missing files and missing keys fall back to defaults.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ini::Ini;
use thiserror::Error;
use tracing::debug;

use crate::storage::{CacheStore, DiskStore, MemoryStore, StoreError};

const SOURCE_SECTION: &str = "source";
const CACHE_SECTION: &str = "cache";

/// Template used when none is configured.
pub const DEFAULT_TILE_TEMPLATE: &str = "{z}/{x}/{y}.pbf";

/// Errors loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error("unknown config key {0}")]
    UnknownKey(String),
}

/// Which cache store backs the file source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheKind {
    #[default]
    Disk,
    Memory,
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKind::Disk => f.write_str("disk"),
            CacheKind::Memory => f.write_str("memory"),
        }
    }
}

impl FromStr for CacheKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disk" => Ok(CacheKind::Disk),
            "memory" => Ok(CacheKind::Memory),
            _ => Err(ConfigError::InvalidValue {
                key: "cache.kind".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// `[source]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub base_url: Option<String>,
    pub access_token: Option<String>,
    pub tile_template: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            access_token: None,
            tile_template: DEFAULT_TILE_TEMPLATE.to_string(),
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub directory: PathBuf,
    pub kind: CacheKind,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: default_cache_dir(),
            kind: CacheKind::Disk,
        }
    }
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub source: SourceSettings,
    pub cache: CacheSettings,
}

/// Default location of the configuration file.
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tilestream")
        .join("config.ini")
}

/// Default cache directory.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tilestream")
}

impl ConfigFile {
    /// Loads from the default location, or defaults if the file is absent.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&text)
    }

    /// Parses INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut config = Self::default();

        if let Some(section) = ini.section(Some(SOURCE_SECTION)) {
            for (key, value) in section.iter() {
                config.set(&format!("{}.{}", SOURCE_SECTION, key), value)?;
            }
        }
        if let Some(section) = ini.section(Some(CACHE_SECTION)) {
            for (key, value) in section.iter() {
                config.set(&format!("{}.{}", CACHE_SECTION, key), value)?;
            }
        }
        Ok(config)
    }

    /// Saves to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        self.to_ini().write_to_file(path).map_err(write_err)
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        {
            let mut source = ini.with_section(Some(SOURCE_SECTION));
            if let Some(base_url) = &self.source.base_url {
                source.set("base_url", base_url.as_str());
            }
            if let Some(token) = &self.source.access_token {
                source.set("access_token", token.as_str());
            }
            source.set("tile_template", self.source.tile_template.as_str());
        }
        ini.with_section(Some(CACHE_SECTION))
            .set("directory", self.cache.directory.display().to_string())
            .set("kind", self.cache.kind.to_string());
        ini
    }

    /// Reads a value by `section.key`.
    pub fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let value = match key {
            "source.base_url" => self.source.base_url.clone(),
            "source.access_token" => self.source.access_token.clone(),
            "source.tile_template" => Some(self.source.tile_template.clone()),
            "cache.directory" => Some(self.cache.directory.display().to_string()),
            "cache.kind" => Some(self.cache.kind.to_string()),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        };
        Ok(value)
    }

    /// Sets a value by `section.key`. Empty strings clear optional values.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        let optional = || (!value.is_empty()).then(|| value.to_string());
        match key {
            "source.base_url" => self.source.base_url = optional(),
            "source.access_token" => self.source.access_token = optional(),
            "source.tile_template" if !value.is_empty() => {
                self.source.tile_template = value.to_string()
            }
            "cache.directory" if !value.is_empty() => self.cache.directory = PathBuf::from(value),
            "cache.kind" => self.cache.kind = value.parse()?,
            "source.tile_template" | "cache.directory" => {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.source.base_url = Some(url.into());
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.source.access_token = Some(token.into());
        self
    }

    pub fn with_tile_template(mut self, template: impl Into<String>) -> Self {
        self.source.tile_template = template.into();
        self
    }

    pub fn with_cache_dir(mut self, directory: impl Into<PathBuf>) -> Self {
        self.cache.directory = directory.into();
        self
    }

    pub fn with_cache_kind(mut self, kind: CacheKind) -> Self {
        self.cache.kind = kind;
        self
    }

    /// Opens the configured cache store.
    pub fn open_store(&self) -> Result<Box<dyn CacheStore>, StoreError> {
        Ok(match self.cache.kind {
            CacheKind::Disk => Box::new(DiskStore::open(&self.cache.directory)?),
            CacheKind::Memory => Box::new(MemoryStore::new()),
        })
    }
}

/// All keys accepted by [`ConfigFile::get`] and [`ConfigFile::set`].
pub const CONFIG_KEYS: &[&str] = &[
    "source.base_url",
    "source.access_token",
    "source.tile_template",
    "cache.directory",
    "cache.kind",
];
