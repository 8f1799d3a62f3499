//! Cache store for fetched resources.
//!
//! Records are keyed by resolved URL (without access token). A store belongs
//! to exactly one source and is only touched from that source's loop thread,
//! so the trait takes `&mut self` and needs no internal locking.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bincode::Options;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use super::http::{Freshness, Validators};

/// File extension of disk records.
const RECORD_EXTENSION: &str = "rec";

/// Errors from cache store operations.
///
/// Callers log these and fall back to the network; they never reach a
/// request's callback.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode cache record: {0}")]
    Encode(String),

    #[error("failed to decode cache record at {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
}

/// One cached resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub url: String,
    pub data: Bytes,
    pub expires: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub accessed: DateTime<Utc>,
}

impl CacheRecord {
    /// Builds a record from a fresh network response.
    pub fn new(url: impl Into<String>, data: Bytes, freshness: Freshness, now: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            data,
            expires: freshness.expires,
            modified: freshness.modified,
            etag: freshness.etag,
            accessed: now,
        }
    }

    /// A record is fresh while its expiry lies in the future. Records
    /// without an expiry are always stale.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| expires > now)
    }

    /// Conditional request validators, if the record carries any.
    pub fn validators(&self) -> Option<Validators> {
        let validators = Validators {
            etag: self.etag.clone(),
            modified: self.modified,
        };
        validators.is_usable().then_some(validators)
    }

    /// Applies the headers of a 304 response, keeping the payload.
    pub fn refresh(&mut self, freshness: Freshness, now: DateTime<Utc>) {
        self.expires = freshness.expires;
        if freshness.modified.is_some() {
            self.modified = freshness.modified;
        }
        if freshness.etag.is_some() {
            self.etag = freshness.etag;
        }
        self.accessed = now;
    }
}

/// Usage summary of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub records: usize,
    pub bytes: u64,
}

/// Persistent record storage keyed by URL.
pub trait CacheStore: Send {
    fn get(&mut self, url: &str) -> Result<Option<CacheRecord>, StoreError>;

    /// Inserts or replaces the record for `record.url`.
    fn put(&mut self, record: CacheRecord) -> Result<(), StoreError>;

    /// Updates the access time of an existing record.
    fn touch(&mut self, url: &str, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Removes a record. Returns true if one existed.
    fn remove(&mut self, url: &str) -> Result<bool, StoreError>;

    /// Removes every record.
    fn clear(&mut self) -> Result<(), StoreError>;

    fn stats(&self) -> StoreStats;
}

/// In-memory store, lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: HashMap<String, CacheRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn get(&mut self, url: &str) -> Result<Option<CacheRecord>, StoreError> {
        Ok(self.records.get(url).cloned())
    }

    fn put(&mut self, record: CacheRecord) -> Result<(), StoreError> {
        self.records.insert(record.url.clone(), record);
        Ok(())
    }

    fn touch(&mut self, url: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(record) = self.records.get_mut(url) {
            record.accessed = now;
        }
        Ok(())
    }

    fn remove(&mut self, url: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(url).is_some())
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.records.clear();
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            records: self.records.len(),
            bytes: self.records.values().map(|r| r.data.len() as u64).sum(),
        }
    }
}

/// Store writing one bincode file per record.
///
/// Files are named after the SHA-256 of the URL. Writes go to a temporary
/// file first and are renamed into place.
#[derive(Debug)]
pub struct DiskStore {
    directory: PathBuf,
}

/// Encoding of `.rec` files, identical to `bincode::serialize`.
fn record_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

impl DiskStore {
    /// Opens (creating if needed) a store rooted at `directory`.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|source| StoreError::Io {
            path: directory.clone(),
            source,
        })?;
        debug!(directory = %directory.display(), "Opened disk cache");
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn record_path(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        self.directory
            .join(format!("{:x}", digest))
            .with_extension(RECORD_EXTENSION)
    }

    fn read(&self, path: &Path) -> Result<Option<CacheRecord>, StoreError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        // A record is never larger than its file.
        let limit = file.metadata().map(|meta| meta.len()).unwrap_or(0);
        record_options()
            .with_limit(limit)
            .deserialize_from(BufReader::new(file))
            .map(Some)
            .map_err(|e| StoreError::Decode {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    fn write(&self, path: &Path, record: &CacheRecord) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        let temp_path = path.with_extension("tmp");
        let file = File::create(&temp_path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, record)
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        writer.flush().map_err(io_err)?;
        drop(writer);
        fs::rename(&temp_path, path).map_err(io_err)
    }

    fn record_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let entries = fs::read_dir(&self.directory).map_err(|source| StoreError::Io {
            path: self.directory.clone(),
            source,
        })?;

        Ok(entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == RECORD_EXTENSION))
            .collect())
    }
}

impl CacheStore for DiskStore {
    fn get(&mut self, url: &str) -> Result<Option<CacheRecord>, StoreError> {
        let path = self.record_path(url);
        match self.read(&path)? {
            // Digest collision or a foreign file: treat as a miss.
            Some(record) if record.url != url => {
                warn!(url = %url, stored = %record.url, "Cache record URL mismatch");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn put(&mut self, record: CacheRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.url);
        self.write(&path, &record)
    }

    fn touch(&mut self, url: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        if let Some(mut record) = self.get(url)? {
            record.accessed = now;
            self.put(record)?;
        }
        Ok(())
    }

    fn remove(&mut self, url: &str) -> Result<bool, StoreError> {
        let path = self.record_path(url);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        for path in self.record_files()? {
            fs::remove_file(&path).map_err(|source| StoreError::Io { path, source })?;
        }
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        let files = match self.record_files() {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "Failed to list disk cache");
                return StoreStats::default();
            }
        };

        StoreStats {
            records: files.len(),
            bytes: files
                .iter()
                .filter_map(|path| fs::metadata(path).ok())
                .map(|meta| meta.len())
                .sum(),
        }
    }
}
